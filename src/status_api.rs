use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::job_manager::JobManager;

#[derive(Debug, Serialize, Deserialize)]
struct StatusEntryJson {
    name: String,
    state: String,
    pid: u32,
    uptime: u64,
    last_exit_code: Option<i32>,
    retries_remaining: u32,
}

const DASHBOARD_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>taskmaster</title>
<style>
body { font-family: monospace; margin: 2rem; }
table { border-collapse: collapse; }
td, th { border: 1px solid #ccc; padding: 0.3rem 0.6rem; text-align: left; }
</style>
</head>
<body>
<h1>taskmaster</h1>
<table id="instances">
<thead><tr><th>name</th><th>state</th><th>pid</th><th>uptime</th><th>last exit</th><th>retries left</th></tr></thead>
<tbody></tbody>
</table>
<script>
async function refresh() {
  const res = await fetch('/api/status');
  const rows = await res.json();
  const body = document.querySelector('#instances tbody');
  body.innerHTML = '';
  for (const row of rows) {
    const tr = document.createElement('tr');
    tr.innerHTML = `<td>${row.name}</td><td>${row.state}</td><td>${row.pid}</td><td>${row.uptime}</td><td>${row.last_exit_code ?? ''}</td><td>${row.retries_remaining}</td>`;
    body.appendChild(tr);
  }
}
refresh();
setInterval(refresh, 2000);
</script>
</body>
</html>
"#;

async fn dashboard() -> impl Responder {
    HttpResponse::Ok().content_type("text/html").body(DASHBOARD_HTML)
}

async fn status(manager: web::Data<Arc<JobManager>>) -> impl Responder {
    let entries: Vec<StatusEntryJson> = manager
        .status()
        .into_iter()
        .map(|e| StatusEntryJson {
            name: e.id,
            state: e.state.to_string(),
            pid: e.pid,
            uptime: e.uptime_secs,
            last_exit_code: e.last_exit_code,
            retries_remaining: e.retries_remaining,
        })
        .collect();
    HttpResponse::Ok().json(entries)
}

/// Runs the read-only status API on its own OS thread with its own actix runtime, so that
/// shell interaction on the main thread is never blocked by HTTP traffic.
pub fn spawn(manager: Arc<JobManager>, addr: SocketAddr) -> JoinHandle<()> {
    thread::spawn(move || {
        let system = actix_web::rt::System::new();
        let result = system.block_on(async move {
            info!(%addr, "status API listening");
            HttpServer::new(move || {
                App::new()
                    .app_data(web::Data::new(manager.clone()))
                    .route("/", web::get().to(dashboard))
                    .route("/api/status", web::get().to(status))
            })
            .bind(addr)?
            .run()
            .await
        });

        if let Err(err) = result {
            error!(error = %err, "status API server exited with an error");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Policy;
    use actix_web::{test, App};
    use std::collections::HashMap;

    #[actix_web::test]
    async fn status_endpoint_returns_empty_array_for_empty_policy() {
        let manager = Arc::new(JobManager::new(Arc::new(Policy::from_programs(HashMap::new()))));
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(manager))
                .route("/api/status", web::get().to(status)),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/status").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let body: Vec<StatusEntryJson> = test::read_body_json(resp).await;
        assert!(body.is_empty());
    }

    #[actix_web::test]
    async fn status_endpoint_reports_a_started_instance() {
        use crate::policy::{AutoRestart, Program};
        use std::time::Duration;

        let mut programs = HashMap::new();
        programs.insert(
            "svc".to_string(),
            Program {
                name: "svc".to_string(),
                argv: vec!["/bin/sleep".into(), "60".into()],
                numprocs: 1,
                workingdir: None,
                umask: None,
                autostart: false,
                autorestart: AutoRestart::Unexpected,
                exitcodes: [0].into_iter().collect(),
                startretries: 1,
                starttime: Duration::from_secs(1),
                stopsignal: nix::sys::signal::Signal::SIGTERM,
                stoptime: Duration::from_secs(1),
                stdout_path: None,
                stderr_path: None,
                env: HashMap::new(),
            },
        );
        let manager = Arc::new(JobManager::new(Arc::new(Policy::from_programs(programs))));
        manager.start("svc").unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(manager))
                .route("/api/status", web::get().to(status)),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/status").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let body: Vec<StatusEntryJson> = test::read_body_json(resp).await;
        assert_eq!(body.len(), 1);
        assert_eq!(body[0].name, "svc:0");
        assert_eq!(body[0].state, "STARTING");
        assert!(body[0].pid > 0);
    }

    #[actix_web::test]
    async fn dashboard_serves_html_that_polls_the_status_endpoint() {
        let manager = Arc::new(JobManager::new(Arc::new(Policy::from_programs(HashMap::new()))));
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(manager))
                .route("/", web::get().to(dashboard)),
        )
        .await;

        let req = test::TestRequest::get().uri("/").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let body = test::read_body(resp).await;
        let html = String::from_utf8(body.to_vec()).unwrap();
        assert!(html.contains("/api/status"));
    }
}
