use serde::Deserialize;

/// Successful `messages:send` response.
#[derive(Deserialize, Debug)]
pub struct SendResponse {
    /// `projects/{project}/messages/{message_id}`
    pub name: String,
}

#[derive(Deserialize, Debug)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Deserialize, Debug)]
pub struct ErrorBody {
    pub code: Option<u16>,
    #[serde(default)]
    pub message: String,
    pub status: Option<String>,
    #[serde(default)]
    pub details: Vec<ErrorDetail>,
}

#[derive(Deserialize, Debug)]
pub struct ErrorDetail {
    #[serde(rename = "errorCode")]
    pub error_code: Option<String>,
}

impl ErrorBody {
    /// Most specific error code: the FCM `errorCode` detail, else the RPC status.
    pub fn error_code(&self) -> Option<&str> {
        self.details
            .iter()
            .find_map(|d| d.error_code.as_deref())
            .or(self.status.as_deref())
    }
}
