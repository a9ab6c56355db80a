// Input validation utilities

use anyhow::Result;
use regex::Regex;

/// A pluggable check on a single text field.
///
/// Implementations return a user-facing message in the error.
pub trait TextValidator: Send + Sync {
    fn validate(&self, value: &str) -> Result<()>;
}

/// Value must have at least `min` characters after trimming.
#[derive(Debug, Clone)]
pub struct MinLength {
    pub label: &'static str,
    pub min: usize,
}

impl TextValidator for MinLength {
    fn validate(&self, value: &str) -> Result<()> {
        validate_min_length(self.label, value, self.min)
    }
}

/// Password policy: minimum length, mixed case, a digit and a special
/// character.
#[derive(Debug, Clone)]
pub struct StrongPassword {
    pub min: usize,
}

impl TextValidator for StrongPassword {
    fn validate(&self, value: &str) -> Result<()> {
        validate_password_strength(value, "", self.min)
    }
}

#[derive(Debug, Clone, Default)]
pub struct EmailFormat;

impl TextValidator for EmailFormat {
    fn validate(&self, value: &str) -> Result<()> {
        validate_email(value)
    }
}

/// Validate that a field is not blank
pub fn validate_required(label: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(anyhow::anyhow!("{} is required", label));
    }
    Ok(())
}

pub fn validate_min_length(label: &str, value: &str, min: usize) -> Result<()> {
    validate_required(label, value)?;
    if value.trim().chars().count() < min {
        return Err(anyhow::anyhow!(
            "{} must be at least {} characters",
            label,
            min
        ));
    }
    Ok(())
}

/// Validate password strength
pub fn validate_password_strength(password: &str, username: &str, min: usize) -> Result<()> {
    if password.chars().count() < min {
        return Err(anyhow::anyhow!(
            "Password must be at least {} characters",
            min
        ));
    }

    let has_upper = password.chars().any(|c| c.is_uppercase());
    let has_lower = password.chars().any(|c| c.is_lowercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_special = password
        .chars()
        .any(|c| !c.is_alphanumeric() && !c.is_whitespace());

    if !(has_upper && has_lower && has_digit && has_special) {
        return Err(anyhow::anyhow!(
            "Password must contain upper and lower case letters, a digit and a special character"
        ));
    }

    let user = username.trim().to_lowercase();
    if !user.is_empty() && password.to_lowercase().contains(&user) {
        return Err(anyhow::anyhow!("Password must not contain the username"));
    }

    Ok(())
}

/// Validate email format (basic RFC-style shape)
pub fn validate_email(email: &str) -> Result<()> {
    let s = email.trim();
    if s.is_empty() {
        return Err(anyhow::anyhow!("Email is required"));
    }

    let email_re = Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$")
        .map_err(|e| anyhow::anyhow!("Internal error: failed to compile email regex: {}", e))?;
    if !email_re.is_match(s) {
        return Err(anyhow::anyhow!("Email address '{}' is not valid", s));
    }
    Ok(())
}

/// Validate an integer lies in `min..=max`
pub fn validate_range(label: &str, value: u32, min: u32, max: u32) -> Result<()> {
    if value < min || value > max {
        return Err(anyhow::anyhow!(
            "{} must be between {} and {}",
            label,
            min,
            max
        ));
    }
    Ok(())
}

/// Validate a database name for a server dialect.
pub fn validate_database_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(anyhow::anyhow!("Database name cannot be empty"));
    }

    if name.len() > 128 {
        return Err(anyhow::anyhow!(
            "Database name cannot exceed 128 characters"
        ));
    }

    if name.starts_with(' ') || name.ends_with(' ') {
        return Err(anyhow::anyhow!(
            "Database name cannot start or end with spaces"
        ));
    }

    let invalid_chars = ['<', '>', '"', '\\', '|', '?', '*', ';', '\0'];
    if name.chars().any(|c| invalid_chars.contains(&c)) {
        return Err(anyhow::anyhow!("Database name contains invalid characters"));
    }

    // "." and ".." collapse away as URL path segments.
    if name == "." || name == ".." {
        return Err(anyhow::anyhow!("Database name cannot be '{}'", name));
    }

    Ok(())
}

/// Validate a host name or address (no scheme, no spaces).
pub fn validate_host(host: &str) -> Result<()> {
    let s = host.trim();
    if s.is_empty() {
        return Err(anyhow::anyhow!("Host is required"));
    }
    let host_re = Regex::new(r"^[A-Za-z0-9._\-:\[\]]+$")
        .map_err(|e| anyhow::anyhow!("Internal error: failed to compile host regex: {}", e))?;
    if !host_re.is_match(s) {
        return Err(anyhow::anyhow!("Host '{}' contains invalid characters", s));
    }
    if s.contains([':', '[', ']']) {
        let bare = s
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(s);
        if bare.parse::<std::net::Ipv6Addr>().is_err() {
            return Err(anyhow::anyhow!("Host '{}' is not a valid IPv6 address", s));
        }
    }
    Ok(())
}
