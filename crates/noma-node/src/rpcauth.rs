//! bitcoind `rpcauth` credentials.
//!
//! The `rpcauth=` line stores `user:salt$hmac`; the clear password only goes to
//! lnd and the operator's credentials file.

use hmac::{Hmac, Mac};
use noma_core::error::{NomaError, NomaResult};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

const SALT_BYTES: usize = 16;
const PASSWORD_BYTES: usize = 32;

/// A generated credential pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcAuth {
    pub user: String,
    pub salt: String,
    pub password: String,
    pub hmac: String,
}

impl RpcAuth {
    /// Fresh random salt and password for `user`.
    pub fn generate(user: &str) -> NomaResult<Self> {
        Self::with_password(user, &random_hex(PASSWORD_BYTES), &random_hex(SALT_BYTES))
    }

    pub fn with_password(user: &str, password: &str, salt: &str) -> NomaResult<Self> {
        Ok(Self {
            user: user.to_string(),
            salt: salt.to_string(),
            password: password.to_string(),
            hmac: password_hmac(salt, password)?,
        })
    }

    /// Value for the `rpcauth` key in bitcoin.conf.
    pub fn value(&self) -> String {
        format!("{}:{}${}", self.user, self.salt, self.hmac)
    }

    /// Block appended to the credentials file on the important device.
    pub fn record(&self) -> String {
        format!(
            "rpcauth={}\nusername={}\npassword={}\n",
            self.value(),
            self.user,
            self.password
        )
    }
}

/// HMAC-SHA256 keyed with the salt's hex text over the password, hex encoded.
pub fn password_hmac(salt: &str, password: &str) -> NomaResult<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(salt.as_bytes())
        .map_err(|err| NomaError::InvalidConfig(format!("rpcauth salt rejected: {err}")))?;
    mac.update(password.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_matches_bitcoind_rpcauth_script() {
        let digest = password_hmac("cb77f0957de88ff388cf817ddbc7273", "secret").unwrap();
        assert_eq!(
            digest,
            "c9ce7cb2de2ad5aadae1449ad1e62baa38d98fced30a7cd2eae656cab574b678"
        );
    }

    #[test]
    fn generated_credentials_have_expected_shape() {
        let auth = RpcAuth::generate("lncm").unwrap();
        assert_eq!(auth.salt.len(), SALT_BYTES * 2);
        assert_eq!(auth.password.len(), PASSWORD_BYTES * 2);
        assert_eq!(auth.hmac.len(), 64);

        let value = auth.value();
        let (user, rest) = value.split_once(':').unwrap();
        let (salt, hmac) = rest.split_once('$').unwrap();
        assert_eq!(user, "lncm");
        assert_eq!(salt, auth.salt);
        assert_eq!(hmac, password_hmac(salt, &auth.password).unwrap());
    }

    #[test]
    fn two_generations_differ() {
        let a = RpcAuth::generate("lncm").unwrap();
        let b = RpcAuth::generate("lncm").unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.password, b.password);
    }

    #[test]
    fn record_lists_value_user_and_password() {
        let auth = RpcAuth::with_password("lncm", "pw", "salt").unwrap();
        let record = auth.record();
        assert!(record.starts_with(&format!("rpcauth=lncm:salt${}\n", auth.hmac)));
        assert!(record.contains("username=lncm\n"));
        assert!(record.ends_with("password=pw\n"));
    }
}
