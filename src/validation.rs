//! Small validation helpers shared by settings and device construction.
use std::net::SocketAddr;

/// Validates if a given string is a socket address (`ip:port`) with a non-zero port.
///
/// # Arguments
///
/// * `addr` - The string to validate.
///
/// # Returns
///
/// * `Ok(())` if the address is valid.
/// * `Err(&'static str)` if the address is invalid.
pub fn is_valid_socket_address(addr: &str) -> Result<(), &'static str> {
    let parsed: SocketAddr = addr.parse().map_err(|_| "Invalid socket address")?;
    if parsed.port() == 0 {
        return Err("Port number must be greater than 0");
    }
    Ok(())
}

/// Validates if a given string is a valid file path.
///
/// # Arguments
///
/// * `path` - The string to validate.
///
/// # Returns
///
/// * `Ok(())` if the file path is valid.
/// * `Err(&'static str)` if the file path is invalid.
pub fn is_valid_path(path: &str) -> Result<(), &'static str> {
    if path.is_empty() {
        return Err("File path cannot be empty");
    }
    if path.contains('\0') {
        return Err("File path cannot contain null bytes");
    }
    Ok(())
}

/// Validates that a value is a finite number.
pub fn is_finite(value: f64) -> Result<(), &'static str> {
    if value.is_finite() {
        Ok(())
    } else {
        Err("Value must be a finite number")
    }
}

/// Validates that a value is finite and strictly greater than zero.
pub fn is_positive(value: f64) -> Result<(), &'static str> {
    is_finite(value)?;
    if value > 0.0 {
        Ok(())
    } else {
        Err("Value must be greater than 0")
    }
}

/// Validates that a value is finite and not negative.
pub fn is_non_negative(value: f64) -> Result<(), &'static str> {
    is_finite(value)?;
    if value >= 0.0 {
        Ok(())
    } else {
        Err("Value must not be negative")
    }
}

/// Validates that a value is finite and not zero. Used for divisors of the physics model.
pub fn is_non_zero(value: f64) -> Result<(), &'static str> {
    is_finite(value)?;
    if value != 0.0 {
        Ok(())
    } else {
        Err("Value must not be zero")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_addresses() {
        assert!(is_valid_socket_address("0.0.0.0:7681").is_ok());
        assert!(is_valid_socket_address("[::1]:80").is_ok());
        assert!(is_valid_socket_address("127.0.0.1:0").is_err());
        assert!(is_valid_socket_address("localhost").is_err());
    }

    #[test]
    fn paths() {
        assert!(is_valid_path("archive").is_ok());
        assert!(is_valid_path("").is_err());
        assert!(is_valid_path("a\0b").is_err());
    }

    #[test]
    fn numeric_checks() {
        assert!(is_positive(1e-9).is_ok());
        assert!(is_positive(0.0).is_err());
        assert!(is_positive(f64::INFINITY).is_err());
        assert!(is_non_negative(0.0).is_ok());
        assert!(is_non_negative(-0.1).is_err());
        assert!(is_non_zero(-3.0).is_ok());
        assert!(is_non_zero(0.0).is_err());
        assert!(is_finite(f64::NAN).is_err());
    }
}
