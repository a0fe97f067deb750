//! Proxy credential generation

use std::collections::HashSet;

use portbroker_domain::constants::{
    CREDENTIAL_MAX_GENERATION_ATTEMPTS, CREDENTIAL_PASSWORD_LEN, CREDENTIAL_USERNAME_LEN,
};
use portbroker_domain::{BrokerError, ProxyCredential, Result};
use rand::distributions::Alphanumeric;
use rand::Rng;

fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

/// Generate a fresh credential pair.
pub fn generate() -> ProxyCredential {
    ProxyCredential {
        // Leading letter keeps the username valid for relay ACL syntax.
        username: format!("u{}", random_token(CREDENTIAL_USERNAME_LEN)),
        password: random_token(CREDENTIAL_PASSWORD_LEN),
    }
}

/// Generate a credential whose username is not in `taken`.
///
/// The store's partial unique index is the race backstop; this bounded
/// verify-before-insert loop keeps collisions out of the common path.
pub fn generate_distinct(taken: &HashSet<String>) -> Result<ProxyCredential> {
    for _ in 0..CREDENTIAL_MAX_GENERATION_ATTEMPTS {
        let credential = generate();
        if !taken.contains(&credential.username) {
            return Ok(credential);
        }
    }
    Err(BrokerError::Internal("credential generation exhausted its attempts".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_pair_has_expected_shape() {
        let credential = generate();
        assert_eq!(credential.username.len(), CREDENTIAL_USERNAME_LEN + 1);
        assert!(credential.username.starts_with('u'));
        assert_eq!(credential.password.len(), CREDENTIAL_PASSWORD_LEN);
        assert!(credential.username.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn distinct_generation_avoids_taken_usernames() {
        let mut taken = HashSet::new();
        for _ in 0..32 {
            let credential = generate_distinct(&taken).expect("attempts not exhausted");
            assert!(taken.insert(credential.username));
        }
    }
}
