//! Shared application state.

use crate::config::ServiceConfig;
use crate::convert::DocumentConverter;
use crate::error::DocParseError;
use std::sync::Arc;

/// State handed to every handler. Read-only after startup.
#[derive(Clone, Debug)]
pub struct AppState {
    pub converter: Arc<DocumentConverter>,
}

impl AppState {
    pub fn new(converter: DocumentConverter) -> Self {
        Self {
            converter: Arc::new(converter),
        }
    }

    /// Build the production converter from `config`.
    pub fn from_config(config: ServiceConfig) -> Result<Self, DocParseError> {
        Ok(Self::new(DocumentConverter::new(config)?))
    }

    pub fn config(&self) -> &ServiceConfig {
        self.converter.config()
    }
}
