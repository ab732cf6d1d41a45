//! 352 cloud API client.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::device::{DeviceIdentity, DeviceRecord};
use crate::error::{AppError, Result};
use crate::sign::{SignParams, Signer, md5_hex, render_params};

const LOGIN_PATH: &str = "/api2/user/loginByPwd";
const DEVICE_LIST_PATH: &str = "/api2/device/getDeviceList";
const APP_TYPE: &str = "2";
const APP_VERSION: &str = "3.3.3";

/// Envelope shared by every API response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error_msg: Option<String>,
    data: Option<T>,
}

impl<T> Default for ApiResponse<T> {
    fn default() -> Self {
        Self {
            success: false,
            error_msg: None,
            data: None,
        }
    }
}

impl<T: DeserializeOwned> ApiResponse<T> {
    /// A body that is not the expected JSON counts as an unsuccessful response.
    fn parse(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_else(|e| {
            debug!("Unparseable API response: {e}");
            Self::default()
        })
    }

    fn message(&self) -> String {
        self.error_msg.clone().unwrap_or_else(|| "no error message".to_string())
    }
}

#[derive(Debug, Deserialize)]
struct LoginData {
    token: String,
}

/// 352 cloud client: signs form posts and keeps the session token.
pub struct CloudClient {
    client: Client,
    base_url: String,
    signer: Signer,
    token: Option<String>,
}

impl CloudClient {
    /// Create a new client instance.
    ///
    /// # Arguments
    /// * `base_url` - API root (e.g., "https://352.yunext.com")
    /// * `signer` - Key used for the `sign` form field
    pub fn new(base_url: &str, signer: Signer) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            signer,
            token: None,
        })
    }

    /// Log in with phone number and password; the token is kept for later calls.
    pub async fn login(&mut self, phone: &str, password: &str) -> Result<String> {
        info!("Logging in to {} as {phone}", self.base_url);

        let body = self.post_signed(LOGIN_PATH, login_params(phone, password)).await?;
        let token = parse_login(&body)?;

        info!("Login successful");
        self.token = Some(token.clone());
        Ok(token)
    }

    /// Token from the last successful login.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn is_logged_in(&self) -> bool {
        self.token.is_some()
    }

    /// Fetch the account's devices.
    pub async fn device_list(&self) -> Result<Vec<DeviceIdentity>> {
        let Some(token) = self.token.as_deref() else {
            return Err(AppError::authentication("not logged in"));
        };

        let mut params = SignParams::new();
        params.insert("token".to_string(), token.into());

        let body = self.post_signed(DEVICE_LIST_PATH, params).await?;
        let devices = parse_device_list(&body);

        info!("Device list: {} device(s)", devices.len());
        Ok(devices)
    }

    async fn post_signed(&self, path: &str, params: SignParams) -> Result<String> {
        let url = format!("{base}{path}", base = self.base_url);
        let form = signed_form(&self.signer, &params)?;

        debug!("POST {url}");
        let response = self.client.post(&url).form(&form).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            warn!("POST {url} returned {status}");
        }
        Ok(body)
    }
}

fn login_params(phone: &str, password: &str) -> SignParams {
    let mut params = SignParams::new();
    params.insert("username".to_string(), phone.into());
    params.insert("password".to_string(), md5_hex(password).into());
    params.insert("appType".to_string(), APP_TYPE.into());
    params.insert("appVersion".to_string(), APP_VERSION.into());
    params
}

/// Sign `params` and flatten them into form fields, `sign` included.
fn signed_form(signer: &Signer, params: &SignParams) -> Result<Vec<(String, String)>> {
    let sign = signer.sign_params(params)?;
    let mut form = render_params(params)?;
    form.push(("sign".to_string(), sign));
    Ok(form)
}

fn parse_login(body: &str) -> Result<String> {
    let response = ApiResponse::<LoginData>::parse(body);
    if !response.success {
        return Err(AppError::authentication(response.message()));
    }
    response
        .data
        .map(|data| data.token)
        .ok_or_else(|| AppError::authentication("login response carried no token"))
}

fn parse_device_list(body: &str) -> Vec<DeviceIdentity> {
    let response = ApiResponse::<Vec<serde_json::Value>>::parse(body);
    if !response.success {
        warn!("Device list request failed: {}", response.message());
        return Vec::new();
    }

    response
        .data
        .unwrap_or_default()
        .into_iter()
        .filter_map(|raw| {
            let record = match serde_json::from_value::<DeviceRecord>(raw) {
                Ok(record) => record,
                Err(e) => {
                    warn!("Skipping malformed device record: {e}");
                    return None;
                }
            };
            match DeviceIdentity::try_from(record) {
                Ok(identity) => Some(identity),
                Err(e) => {
                    warn!("Skipping device: {e}");
                    None
                }
            }
        })
        .collect()
}
