pub mod cidr;
pub mod subnets;

pub use cidr::CidrError;
pub use subnets::{SubnetService, plan_default_subnets, select_zones};

use crate::cloud::CloudError;

#[derive(thiserror::Error, Debug)]
pub enum NetworkError {
    /// The declared network cannot be satisfied without a spec change.
    #[error("{0}")]
    Config(String),
    #[error(transparent)]
    Cidr(#[from] CidrError),
    #[error("{context}: {source}")]
    Cloud {
        context: String,
        #[source]
        source: CloudError,
    },
}

impl NetworkError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, NetworkError::Config(_) | NetworkError::Cidr(_))
    }

    pub(crate) fn cloud(
        context: impl Into<String>,
    ) -> impl FnOnce(CloudError) -> NetworkError {
        let context = context.into();
        move |source| NetworkError::Cloud { context, source }
    }
}
