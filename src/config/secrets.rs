//! Secret handling utilities.
//!
//! Re-exports secrecy types and provides helpers for logging connection
//! strings without their credentials.

pub use secrecy::{ExposeSecret, SecretString};

/// The URL with any password replaced by `***`, safe to log.
pub fn redacted_url(url: &SecretString) -> String {
    let url = url.expose_secret();
    let Some((scheme, rest)) = url.split_once("://") else {
        return "***".to_string();
    };
    match rest.rsplit_once('@') {
        Some((userinfo, host)) => match userinfo.split_once(':') {
            Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
            None => format!("{scheme}://{userinfo}@{host}"),
        },
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_is_masked() {
        let url = SecretString::from("postgres://app:hunter2@db:5432/tasks".to_string());
        assert_eq!(redacted_url(&url), "postgres://app:***@db:5432/tasks");
    }

    #[test]
    fn urls_without_credentials_pass_through() {
        let url = SecretString::from("redis://localhost:6379/0".to_string());
        assert_eq!(redacted_url(&url), "redis://localhost:6379/0");
        assert_eq!(redacted_url(&SecretString::from("garbage".to_string())), "***");
    }
}
