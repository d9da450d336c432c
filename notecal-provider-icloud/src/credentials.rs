use std::fmt;

pub const DEFAULT_CALDAV_URL: &str = "https://caldav.icloud.com";

/// Apple ID plus an app-specific password.
#[derive(Clone, PartialEq, Eq)]
pub struct ICloudCredentials {
    pub apple_id: String,
    pub app_password: String,
}

impl ICloudCredentials {
    pub fn new(apple_id: impl Into<String>, app_password: impl Into<String>) -> Self {
        ICloudCredentials {
            apple_id: apple_id.into(),
            app_password: app_password.into(),
        }
    }
}

impl fmt::Debug for ICloudCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ICloudCredentials")
            .field("apple_id", &self.apple_id)
            .field("app_password", &"<redacted>")
            .finish()
    }
}
