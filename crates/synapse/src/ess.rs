//! Element Server Suite endpoints: deployment edition and the admin bot.

use {
    reqwest::{Method, StatusCode},
    secrecy::SecretString,
    serde::{Deserialize, Deserializer, Serialize},
    tokio_util::sync::CancellationToken,
    tracing::warn,
};

use crate::{
    client::{AdminClient, cancellable},
    error::{AdminError, Result, decode, ensure_not_error},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Edition {
    Community,
    Pro,
}

impl Edition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Community => "community",
            Self::Pro => "pro",
        }
    }
}

/// Unknown editions read as no edition.
fn lenient_edition<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Edition>, D::Error> {
    let raw = Option::<serde_json::Value>::deserialize(d)?;
    Ok(raw.and_then(|v| serde_json::from_value(v).ok()))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct EssVersion {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default, deserialize_with = "lenient_edition")]
    pub edition: Option<Edition>,
}

/// Credentials of the ESS admin bot, used to act inside rooms on Pro
/// deployments.
#[derive(Debug, Clone, Deserialize)]
pub struct Adminbot {
    pub access_token: SecretString,
    pub device_id: String,
    pub mxid: String,
    #[serde(default)]
    pub secure_passphrase: Option<SecretString>,
    #[serde(default, deserialize_with = "optional_url")]
    pub ui_address: Option<String>,
}

fn optional_url<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let raw = Option::<String>::deserialize(d)?;
    if let Some(ref s) = raw {
        url::Url::parse(s).map_err(serde::de::Error::custom)?;
    }
    Ok(raw)
}

impl AdminClient {
    /// Probe `/_synapse/ess/version`. Anything but cancellation degrades to
    /// an empty [`EssVersion`], which is what non-ESS deployments look like.
    pub async fn ess_version(&self, cancel: &CancellationToken) -> Result<EssVersion> {
        let url = self.endpoint("/_synapse/ess/version")?;
        match self.get_json::<EssVersion>(url, false, cancel).await {
            Ok(version) => Ok(version),
            Err(AdminError::Cancelled) => Err(AdminError::Cancelled),
            Err(e) => {
                warn!(%e, "failed to detect ESS version, probably not an ESS deployment");
                Ok(EssVersion::default())
            },
        }
    }

    /// `None` when the deployment has no admin bot (404).
    pub async fn adminbot(&self, cancel: &CancellationToken) -> Result<Option<Adminbot>> {
        let url = self.endpoint("/_synapse/ess/adminbot")?;
        let req = self.request(Method::GET, url);
        cancellable(cancel, async {
            let resp = req.send().await?;
            if resp.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            let resp = ensure_not_error(resp, false).await?;
            Ok(Some(decode(resp).await?))
        })
        .await
    }
}
