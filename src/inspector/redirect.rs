//! Inspector of a non-host node: queries go to the host.

use std::sync::Arc;

use axum::response::{IntoResponse, Redirect, Response};

use crate::inspector::{InfoProvider, InspectorQuery, InspectorService, StatsSource};

pub struct RedirectInspector {
    host: String,
    info: InfoProvider,
}

impl RedirectInspector {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            info: InfoProvider::default(),
        }
    }

    fn location(&self, query: &InspectorQuery) -> String {
        format!(
            "{}{}?{}",
            self.host.trim_end_matches('/'),
            crate::coordinator::http::INSPECTOR_ENDPOINT,
            query.raw
        )
    }
}

impl InspectorService for RedirectInspector {
    fn handle_request(&self, query: &InspectorQuery) -> Response {
        Redirect::temporary(&self.location(query)).into_response()
    }

    fn handle_info_request(&self) -> Response {
        self.info.response()
    }

    fn set_data(&self, source: Arc<dyn StatsSource>) {
        self.info.set(source);
    }

    fn start(&self) {}

    fn stop(&self) {}
}
