//! Request/response DTOs for the provider's API
//!
//! Every field is string-typed because that is how the wire carries it; the
//! `#[serde(rename)]` attributes hold the provider's wire names. Request
//! types embed [`RequestEnvelope`] with `#[serde(flatten)]` so its fields
//! flatten onto the request without prefixing.

use serde::{Deserialize, Serialize};

/// Common fields carried by every request
#[derive(Debug, Clone, Default, Serialize)]
pub struct RequestEnvelope {
    /// Function ID selecting the operation
    #[serde(rename = "sCLMID")]
    pub clmid: String,
    /// Per-session request sequence number
    #[serde(rename = "p_no")]
    pub p_no: String,
    /// Client-side send timestamp, `YYYY.MM.DD-HH:MM:SS.mmm`
    #[serde(rename = "p_sd_date")]
    pub p_sd_date: String,
    /// Response JSON format selector (fixed "4")
    #[serde(rename = "sJsonOfmt")]
    pub json_ofmt: String,
}

impl RequestEnvelope {
    pub fn new(clmid: &str, p_no: u32) -> Self {
        Self {
            clmid: clmid.to_string(),
            p_no: p_no.to_string(),
            p_sd_date: super::marshal::format_sd_date(chrono::Local::now()),
            json_ofmt: "4".to_string(),
        }
    }
}

// ============================================================================
// Authentication
// ============================================================================

/// Function ID for login
pub const CLMID_LOGIN: &str = "CLMAuthLoginRequest";
/// Function ID for logout
pub const CLMID_LOGOUT: &str = "CLMAuthLogoutRequest";

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    #[serde(flatten)]
    pub envelope: RequestEnvelope,
    #[serde(rename = "sUserId")]
    pub user_id: String,
    #[serde(rename = "sPassword")]
    pub password: String,
}

/// Login response: result, account attributes and the four granted
/// endpoint URLs (a subset of the full account-flag payload)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoginResponse {
    #[serde(rename = "sResultCode", default)]
    pub result_code: String,
    #[serde(rename = "sResultText", default)]
    pub result_text: String,
    #[serde(rename = "sLastLoginDate", default)]
    pub last_login_date: String,
    #[serde(rename = "sSecondPasswordOmit", default)]
    pub second_password_omit: String,
    #[serde(rename = "sSogoKouzaKubun", default)]
    pub general_account_type: String,
    #[serde(rename = "sSinyouKouzaKubun", default)]
    pub margin_account_type: String,
    #[serde(rename = "sUrlRequest", default)]
    pub request_url: String,
    #[serde(rename = "sUrlMaster", default)]
    pub master_url: String,
    #[serde(rename = "sUrlPrice", default)]
    pub price_url: String,
    #[serde(rename = "sUrlEvent", default)]
    pub event_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogoutRequest {
    #[serde(flatten)]
    pub envelope: RequestEnvelope,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogoutResponse {
    #[serde(rename = "sResultCode", default)]
    pub result_code: String,
    #[serde(rename = "sResultText", default)]
    pub result_text: String,
}

// ============================================================================
// Master data download
// ============================================================================

/// Function ID opening a master data download stream
pub const CLMID_MASTER_DOWNLOAD: &str = "CLMEventDownload";
/// Discriminator value of the stream-terminating sentinel object
pub const CLMID_DOWNLOAD_COMPLETE: &str = "CLMEventDownloadComplete";

/// Discriminators of the typed master records this client collects
pub const CLMID_SYSTEM_STATUS: &str = "CLMSystemStatus";
pub const CLMID_OPERATION_STATUS: &str = "CLMUnyouStatus";
pub const CLMID_DATE_INFO: &str = "CLMDateZyouhou";
pub const CLMID_TICK_RULE: &str = "CLMYobine";
pub const CLMID_STOCK_MASTER: &str = "CLMIssueMstKabu";
pub const CLMID_STOCK_MARKET_MASTER: &str = "CLMIssueSizyouMstKabu";

#[derive(Debug, Clone, Serialize)]
pub struct MasterDownloadRequest {
    #[serde(flatten)]
    pub envelope: RequestEnvelope,
    /// Comma-separated function IDs to download; empty means everything
    #[serde(rename = "sTargetCLMID", skip_serializing_if = "String::is_empty")]
    pub target_clmid: String,
}

/// System availability notice
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SystemStatus {
    #[serde(rename = "sSystemStatusKey", default)]
    pub status_key: String,
    #[serde(rename = "sLoginKyokaKubun", default)]
    pub login_permission: String,
    #[serde(rename = "sSystemStatus", default)]
    pub system_status: String,
}

/// Per-business operational state row
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperationStatus {
    #[serde(rename = "sSystemKouzaKubun", default)]
    pub system_account_type: String,
    #[serde(rename = "sUnyouCategory", default)]
    pub category: String,
    #[serde(rename = "sUnyouUnit", default)]
    pub unit: String,
    #[serde(rename = "sEigyouDayC", default)]
    pub business_day_flag: String,
    #[serde(rename = "sUnyouStatus", default)]
    pub status: String,
}

/// Exchange calendar row keyed by `sDayKey`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DateInfo {
    #[serde(rename = "sDayKey", default)]
    pub day_key: String,
    #[serde(rename = "sMaeEigyouDay_1", default)]
    pub previous_business_day: String,
    #[serde(rename = "sTheDay", default)]
    pub current_day: String,
    #[serde(rename = "sYokuEigyouDay_1", default)]
    pub next_business_day: String,
    #[serde(rename = "sKabuUkewatasiDay", default)]
    pub stock_settlement_date: String,
}

/// Tick size table row: price bands and the tick unit for each
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TickRule {
    #[serde(rename = "sYobineTaniNumber", default)]
    pub tick_unit_number: String,
    #[serde(rename = "sTekiyouDay", default)]
    pub applicable_date: String,
    #[serde(rename = "sKizunPrice_1", default)]
    pub base_price_1: String,
    #[serde(rename = "sYobineTanka_1", default)]
    pub tick_value_1: String,
    #[serde(rename = "sKizunPrice_2", default)]
    pub base_price_2: String,
    #[serde(rename = "sYobineTanka_2", default)]
    pub tick_value_2: String,
}

/// Stock issue master record
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StockMaster {
    #[serde(rename = "sIssueCode", default)]
    pub issue_code: String,
    #[serde(rename = "sIssueName", default)]
    pub issue_name: String,
    #[serde(rename = "sIssueNameRyaku", default)]
    pub issue_name_short: String,
    #[serde(rename = "sIssueNameKana", default)]
    pub issue_name_kana: String,
    #[serde(rename = "sBaibaiTani", default)]
    pub trading_unit: String,
    #[serde(rename = "sBaibaiTeisiC", default)]
    pub trading_halt_flag: String,
    #[serde(rename = "sYusenSizyou", default)]
    pub preferred_market: String,
    #[serde(rename = "sGyousyuCode", default)]
    pub industry_code: String,
}

/// Per-market attributes of a stock issue
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StockMarketMaster {
    #[serde(rename = "sIssueCode", default)]
    pub issue_code: String,
    #[serde(rename = "sZyouzyouSizyou", default)]
    pub listing_market: String,
    #[serde(rename = "sNehabaMin", default)]
    pub lower_limit: String,
    #[serde(rename = "sNehabaMax", default)]
    pub upper_limit: String,
    #[serde(rename = "sSinyouC", default)]
    pub margin_eligibility: String,
    #[serde(rename = "sZenzituOwarine", default)]
    pub previous_close: String,
}
