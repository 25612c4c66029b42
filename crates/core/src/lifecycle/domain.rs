//! Domain syntax validation.

const MAX_DOMAIN_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// Normalizes and validates a user-supplied domain.
///
/// Returns the lower-cased domain, or the reason it was rejected.
pub fn normalize_domain(input: &str) -> Result<String, String> {
    let domain = input.trim().trim_end_matches('.').to_ascii_lowercase();

    if domain.is_empty() {
        return Err("domain is empty".to_string());
    }
    if domain.starts_with("http://") || domain.starts_with("https://") || domain.contains("://") {
        return Err("enter the bare domain without a scheme".to_string());
    }
    if domain.contains('/') {
        return Err("enter the bare domain without a path".to_string());
    }
    if domain.starts_with("*.") {
        return Err("choose the wildcard type instead of typing *.".to_string());
    }
    if domain.len() > MAX_DOMAIN_LEN {
        return Err(format!("domain is longer than {} characters", MAX_DOMAIN_LEN));
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return Err("domain needs at least two labels".to_string());
    }
    for label in &labels {
        validate_label(label)?;
    }

    Ok(domain)
}

fn validate_label(label: &str) -> Result<(), String> {
    if label.is_empty() {
        return Err("empty label".to_string());
    }
    if label.len() > MAX_LABEL_LEN {
        return Err(format!("label '{}' is longer than {} characters", label, MAX_LABEL_LEN));
    }
    if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(format!("label '{}' contains invalid characters", label));
    }
    if label.starts_with('-') || label.ends_with('-') {
        return Err(format!("label '{}' starts or ends with a hyphen", label));
    }
    Ok(())
}
