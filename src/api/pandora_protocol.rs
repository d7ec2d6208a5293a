use blowfish::Blowfish;
use chrono::Utc;
use cipher::block_padding::ZeroPadding;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit};
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};

type BfEcbEnc = ecb::Encryptor<Blowfish>;
type BfEcbDec = ecb::Decryptor<Blowfish>;

/// Device credentials for the partner-login phase. The defaults are the
/// long-published android device keys the JSON tuner API accepts.
#[derive(Debug, Clone)]
pub struct PartnerCredentials {
    pub username: String,
    pub password: String,
    pub device_model: String,
    pub version: String,
    pub encrypt_key: String,
    pub decrypt_key: String,
}

impl Default for PartnerCredentials {
    fn default() -> Self {
        Self {
            username: "android".into(),
            password: "AC7IBG09A3DTSYM4R41UJWL07VLN8JI7".into(),
            device_model: "android-generic".into(),
            version: "5".into(),
            encrypt_key: "6#26FRL$ZWD".into(),
            decrypt_key: "R=U!LH$O2B#".into(),
        }
    }
}

/// Result of a completed two-phase handshake. Immutable: re-login builds a
/// fresh session and swaps it in wholesale, fields are never updated in
/// place.
#[derive(Debug, Clone)]
pub struct PandoraSession {
    pub sync_time_offset: i64,
    pub partner_id: String,
    pub partner_auth_token: String,
    pub user_id: String,
    pub user_auth_token: String,
}

impl PandoraSession {
    /// Server-corrected current time, attached to every outgoing encrypted
    /// request so replay validation accepts it.
    pub fn sync_time(&self) -> i64 {
        Utc::now().timestamp() - self.sync_time_offset
    }
}

/// Low-level client for the encrypted JSON tuner protocol: login
/// handshake, blowfish request framing, response unwrapping. The base URL
/// can be overridden via PANDORA_API_BASE for tests (mockito).
pub struct ProtocolClient {
    client: Client,
    partner: PartnerCredentials,
}

impl ProtocolClient {
    pub fn new(partner: PartnerCredentials) -> Self {
        Self {
            client: Client::new(),
            partner,
        }
    }

    fn base_url() -> String {
        std::env::var("PANDORA_API_BASE")
            .unwrap_or_else(|_| "https://tuner.pandora.com/services/json".into())
    }

    /// Blowfish-ECB encrypt `plain` with the device encrypt key; the wire
    /// form is lowercase hex of the zero-padded ciphertext.
    pub fn encrypt(&self, plain: &[u8]) -> CoreResult<String> {
        let enc = BfEcbEnc::new_from_slice(self.partner.encrypt_key.as_bytes())
            .map_err(|e| CoreError::Encryption(format!("bad encrypt key: {}", e)))?;
        let ct = enc.encrypt_padded_vec_mut::<ZeroPadding>(plain);
        Ok(hex::encode(ct))
    }

    /// Inverse of `encrypt`, using the device decrypt key.
    pub fn decrypt(&self, hex_cipher: &str) -> CoreResult<Vec<u8>> {
        let ct = hex::decode(hex_cipher.trim())
            .map_err(|e| CoreError::Decryption(format!("bad hex: {}", e)))?;
        let dec = BfEcbDec::new_from_slice(self.partner.decrypt_key.as_bytes())
            .map_err(|e| CoreError::Decryption(format!("bad decrypt key: {}", e)))?;
        let pt = dec
            .decrypt_padded_vec_mut::<ZeroPadding>(&ct)
            .map_err(|e| CoreError::Decryption(format!("bad ciphertext: {}", e)))?;
        Ok(pt)
    }

    /// The encrypted server timestamp carries four bytes of garbage before
    /// the ASCII unix time.
    fn parse_sync_time(&self, encrypted: &str) -> CoreResult<i64> {
        let plain = self.decrypt(encrypted)?;
        if plain.len() <= 4 {
            return Err(CoreError::Decryption("sync time too short".into()));
        }
        let digits: String = plain[4..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .map(|&b| b as char)
            .collect();
        digits
            .parse::<i64>()
            .map_err(|e| CoreError::Decryption(format!("sync time not numeric: {}", e)))
    }

    /// Phase one: cleartext device credentials in, encrypted server
    /// timestamp and partner tokens out. Any failure here is terminal for
    /// the login attempt.
    pub async fn partner_login(&self) -> CoreResult<(String, String, i64)> {
        let url = format!("{}/?method=auth.partnerLogin", Self::base_url());
        let body = json!({
            "username": self.partner.username,
            "password": self.partner.password,
            "deviceModel": self.partner.device_model,
            "version": self.partner.version,
        });
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::PartnerAuth(format!("transport: {}", e)))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(CoreError::PartnerAuth(format!("status {}", status)));
        }
        let j: Value = resp
            .json()
            .await
            .map_err(|e| CoreError::PartnerAuth(format!("bad json: {}", e)))?;
        if j["stat"].as_str() != Some("ok") {
            return Err(CoreError::PartnerAuth(format!(
                "stat={} code={}",
                j["stat"].as_str().unwrap_or("?"),
                j["code"]
            )));
        }
        let result = &j["result"];
        let partner_id = result["partnerId"]
            .as_str()
            .ok_or_else(|| CoreError::PartnerAuth("no partnerId".into()))?
            .to_string();
        let partner_auth_token = result["partnerAuthToken"]
            .as_str()
            .ok_or_else(|| CoreError::PartnerAuth("no partnerAuthToken".into()))?
            .to_string();
        let sync_enc = result["syncTime"]
            .as_str()
            .ok_or_else(|| CoreError::PartnerAuth("no syncTime".into()))?;
        let server_time = self.parse_sync_time(sync_enc)?;
        let offset = Utc::now().timestamp() - server_time;
        debug!(offset, "partner login ok");
        Ok((partner_id, partner_auth_token, offset))
    }

    /// Phase two: encrypted user credentials in, user tokens out. On
    /// success the returned session replaces any previous one wholesale.
    pub async fn user_login(&self, username: &str, password: &str) -> CoreResult<PandoraSession> {
        let (partner_id, partner_auth_token, offset) = self.partner_login().await?;

        let sync_time = Utc::now().timestamp() - offset;
        let payload = json!({
            "loginType": "user",
            "username": username,
            "password": password,
            "partnerAuthToken": partner_auth_token,
            "syncTime": sync_time,
        });
        let body = self.encrypt(payload.to_string().as_bytes())?;
        let url = format!(
            "{}/?method=auth.userLogin&auth_token={}&partner_id={}",
            Self::base_url(),
            urlencoding::encode(&partner_auth_token),
            partner_id
        );
        let resp = self
            .client
            .post(&url)
            .body(body)
            .send()
            .await
            .map_err(|e| CoreError::UserAuth(format!("transport: {}", e)))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(CoreError::UserAuth(format!("status {}", status)));
        }
        let j: Value = resp
            .json()
            .await
            .map_err(|e| CoreError::UserAuth(format!("bad json: {}", e)))?;
        if j["stat"].as_str() != Some("ok") {
            return Err(CoreError::UserAuth(format!(
                "stat={} code={}",
                j["stat"].as_str().unwrap_or("?"),
                j["code"]
            )));
        }
        let result = &j["result"];
        let user_id = result["userId"]
            .as_str()
            .ok_or_else(|| CoreError::UserAuth("no userId".into()))?
            .to_string();
        let user_auth_token = result["userAuthToken"]
            .as_str()
            .ok_or_else(|| CoreError::UserAuth("no userAuthToken".into()))?
            .to_string();
        Ok(PandoraSession {
            sync_time_offset: offset,
            partner_id,
            partner_auth_token,
            user_id,
            user_auth_token,
        })
    }

    /// Authenticated API call. `args` is augmented with the user token and
    /// corrected time; when `encrypted` the body goes out as hex
    /// ciphertext. Returns the unwrapped `result` value.
    pub async fn call(
        &self,
        session: &PandoraSession,
        method: &str,
        mut args: Value,
        encrypted: bool,
    ) -> CoreResult<Value> {
        let obj = args
            .as_object_mut()
            .ok_or_else(|| CoreError::Provider(anyhow::anyhow!("args must be a json object")))?;
        obj.insert("userAuthToken".into(), json!(session.user_auth_token));
        obj.insert("syncTime".into(), json!(session.sync_time()));

        let url = format!(
            "{}/?method={}&auth_token={}&partner_id={}&user_id={}",
            Self::base_url(),
            method,
            urlencoding::encode(&session.user_auth_token),
            session.partner_id,
            session.user_id
        );
        let req = if encrypted {
            let body = self.encrypt(args.to_string().as_bytes())?;
            self.client.post(&url).body(body)
        } else {
            self.client.post(&url).json(&args)
        };
        let resp = req
            .send()
            .await
            .map_err(|e| CoreError::Provider(anyhow::anyhow!("{} transport: {}", method, e)))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(CoreError::Provider(anyhow::anyhow!(
                "{} failed: {}",
                method,
                status
            )));
        }
        let j: Value = resp
            .json()
            .await
            .map_err(|e| CoreError::Provider(anyhow::anyhow!("{} bad json: {}", method, e)))?;
        if j["stat"].as_str() != Some("ok") {
            warn!(method, code = %j["code"], "api call rejected");
            return Err(CoreError::Provider(anyhow::anyhow!(
                "{} rejected: stat={} code={}",
                method,
                j["stat"].as_str().unwrap_or("?"),
                j["code"]
            )));
        }
        Ok(j["result"].clone())
    }
}
