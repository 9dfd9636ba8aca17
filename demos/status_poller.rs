use lifeline::{
    get_timeout_or_test_fallback, poll_task, run_all_disposers, task_methods, Destroyable, Next,
    Settings, TimeoutOptions, TokioRunloop,
};
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;
use tokio::task::LocalSet;

/// Polls a (fake) status endpoint, waiting for each response before asking again
#[derive(Default)]
struct StatusPoller {
    destroying: Cell<bool>,
    checks: Cell<u32>,
}

impl Destroyable for StatusPoller {
    fn is_destroying(&self) -> bool {
        self.destroying.get()
    }
}

#[task_methods]
impl StatusPoller {
    #[task]
    fn check_status(&self, next: Next) {
        let attempt = self.checks.get() + 1;
        self.checks.set(attempt);
        tokio::task::spawn_local(async move {
            let latency = get_timeout_or_test_fallback(Duration::from_millis(250), TimeoutOptions::default());
            tokio::time::sleep(latency).await;
            println!("[POLL] check #{attempt} finished after {latency:?}");
            next.call();
        });
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .with_target(false)
        .init();

    // LIFELINE_TEST_MODE=true LIFELINE_TIMEOUT_SCALING=10 shortens every check
    // (test mode also suspends polling, so the loop stops after one check).
    let settings = Settings::from_env()?;
    settings.apply()?;

    LocalSet::new()
        .run_until(async {
            TokioRunloop::install();
            let poller = Rc::new(StatusPoller::default());
            let token = poll_task(&poller, "check_status", None)?;
            println!("Polling with token {token}; stopping in 1s");

            tokio::time::sleep(Duration::from_secs(1)).await;
            poller.destroying.set(true);
            run_all_disposers(&poller);
            let checks = poller.checks.get();

            tokio::time::sleep(Duration::from_millis(600)).await;
            println!("{} checks ran; {} after teardown", checks, poller.checks.get() - checks);
            Ok::<_, Box<dyn std::error::Error>>(())
        })
        .await
}
