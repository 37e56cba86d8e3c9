//! Random token generation for runner shared secrets and handoff codes.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::{distr::Alphanumeric, Rng};

/// Length of the random suffix in a runner token.
const RUNNER_TOKEN_LEN: usize = 40;

/// Generate a shared-secret token for a runner.
///
/// The `cbrt-` prefix makes leaked tokens easy to recognize in logs and
/// in secret scanners.
pub fn generate_runner_token() -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(RUNNER_TOKEN_LEN)
        .map(char::from)
        .collect();
    format!("cbrt-{suffix}")
}

/// Generate a single-use authorization code for the cross-origin handoff.
pub fn generate_authorization_code() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runner_token_shape() {
        let token = generate_runner_token();
        assert!(token.starts_with("cbrt-"));
        assert_eq!(token.len(), 5 + RUNNER_TOKEN_LEN);
    }

    #[test]
    fn tokens_are_unique() {
        assert_ne!(generate_runner_token(), generate_runner_token());
        assert_ne!(
            generate_authorization_code(),
            generate_authorization_code()
        );
    }

    #[test]
    fn authorization_code_is_url_safe() {
        let code = generate_authorization_code();
        assert!(code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
