use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use mw_core::MemberView;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::aggregator::HealthAggregator;
use crate::report::HealthReport;

#[derive(Clone)]
struct ReportState {
    view: Arc<dyn MemberView>,
    aggregator: Arc<HealthAggregator>,
}

/// Serves the cluster health report as JSON on `GET /`.
///
/// Every request takes a fresh membership snapshot and probes it; nothing
/// is cached between requests.
pub struct ReportServer {
    state: ReportState,
}

impl ReportServer {
    pub fn new(view: Arc<dyn MemberView>, aggregator: HealthAggregator) -> Self {
        Self {
            state: ReportState {
                view,
                aggregator: Arc::new(aggregator),
            },
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(report))
            .with_state(self.state.clone())
    }

    pub async fn serve<F>(self, addr: SocketAddr, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(addr).await?;
        self.serve_on(listener, shutdown).await
    }

    pub async fn serve_on<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::info!(addr = %listener.local_addr()?, "report server listening");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
    }
}

async fn report(State(state): State<ReportState>) -> Response {
    let members = state.view.members();
    let report = state.aggregator.build_report(&members).await;
    render(&report)
}

/// JSON body with `application/json`, or a 500 carrying the error text.
pub fn render(report: &HealthReport) -> Response {
    match report.to_json() {
        Ok(body) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize health report");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
