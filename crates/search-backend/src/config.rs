/// Connection details for the external search service. Built once by the
/// CLI's `Config` at startup; missing endpoint/credentials is a
/// configuration-fatal error there, not here.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub endpoint: String,
    pub cloud_id: Option<String>,
    pub api_key: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub inference_id: Option<String>,
    pub delete_documents_page_size: usize,
    pub request_timeout_secs: u64,
}

impl BackendConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            cloud_id: None,
            api_key: None,
            username: None,
            password: None,
            inference_id: None,
            delete_documents_page_size: 500,
            request_timeout_secs: 30,
        }
    }
}
