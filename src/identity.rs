use sha2::{Digest, Sha256};

use crate::error::LauncherError;

/// Token passed to the game in offline mode. Not a credential.
const PLACEHOLDER_TOKEN: &str = "0";

/// Locally synthesized player identity. There is no account protocol behind
/// this; the uuid is only stable per name so worlds keep the same player.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    pub uuid: String,
    pub token: String,
}

impl Identity {
    pub fn from_name(raw: &str) -> Result<Self, LauncherError> {
        let username = sanitize_player_name(raw).ok_or(LauncherError::AuthInput)?;
        let uuid = offline_uuid(&username);
        Ok(Self {
            username,
            uuid,
            token: PLACEHOLDER_TOKEN.into(),
        })
    }
}

pub fn sanitize_player_name(name: &str) -> Option<String> {
    let trimmed = name.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

/// 32 lowercase hex chars derived from the player name.
fn offline_uuid(username: &str) -> String {
    let digest = Sha256::digest(format!("OfflinePlayer:{username}").as_bytes());
    digest[..16].iter().map(|b| format!("{b:02x}")).collect()
}
