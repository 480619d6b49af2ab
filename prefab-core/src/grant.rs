use crate::Timestamp;
use serde::{Deserialize, Serialize};

/// Read grant of one user over one externally addressed resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AccessGrant {
    pub user_id: String,
    pub resource_uri: String,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub granted_at: Timestamp,
}
