use lifeline::testing::{assert_no_leaks, pending_tasks};
use lifeline::{
    advance_poll, debounce_task_with, poll_task, run_all_disposers, run_task, schedule_task,
    set_should_poll, Destroyable, PollTask, Task, TaskMethods, TokioRunloop,
};
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;
use tokio::task::LocalSet;

#[derive(Default)]
struct Feed {
    destroying: Cell<bool>,
    fetches: Cell<u32>,
    renders: Cell<u32>,
}

impl Destroyable for Feed {
    fn is_destroying(&self) -> bool {
        self.destroying.get()
    }
}

impl TaskMethods for Feed {}

fn destroy(owner: &Rc<Feed>) {
    owner.destroying.set(true);
    run_all_disposers(owner);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn run_task_fires_after_its_delay() {
    LocalSet::new()
        .run_until(async {
            TokioRunloop::install();
            let feed = Rc::new(Feed::default());

            run_task(&feed, Task::call(|f: &Feed| f.fetches.set(f.fetches.get() + 1)), Duration::from_millis(500))
                .unwrap();
            tokio::time::sleep(Duration::from_millis(499)).await;
            assert_eq!(feed.fetches.get(), 0);
            tokio::time::sleep(Duration::from_millis(2)).await;
            assert_eq!(feed.fetches.get(), 1);
            assert_eq!(pending_tasks(&feed), 0);

            destroy(&feed);
            assert_no_leaks().unwrap();
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn teardown_aborts_real_timers() {
    LocalSet::new()
        .run_until(async {
            let runloop = TokioRunloop::install();
            let feed = Rc::new(Feed::default());

            run_task(&feed, Task::call(|f: &Feed| f.fetches.set(1)), Duration::from_millis(50)).unwrap();
            debounce_task_with(&feed, "fetch", |f: &Feed| f.fetches.set(2), 50u64).unwrap();
            destroy(&feed);

            tokio::time::sleep(Duration::from_millis(100)).await;
            assert_eq!(feed.fetches.get(), 0);
            assert_eq!(runloop.pending_timers(), 0);
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn armed_poll_runs_five_times_unattended() {
    LocalSet::new()
        .run_until(async {
            TokioRunloop::install();
            set_should_poll(|| true);
            let feed = Rc::new(Feed::default());

            poll_task(
                &feed,
                PollTask::call(|f: &Feed, next| {
                    f.fetches.set(f.fetches.get() + 1);
                    if f.fetches.get() < 5 {
                        tokio::task::spawn_local(async move {
                            tokio::task::yield_now().await;
                            next.call();
                        });
                    }
                }),
                None,
            )
            .unwrap();

            for _ in 0..100 {
                if feed.fetches.get() == 5 {
                    break;
                }
                tokio::task::yield_now().await;
            }
            for _ in 0..5 {
                tokio::task::yield_now().await;
            }
            assert_eq!(feed.fetches.get(), 5);
            destroy(&feed);
            assert_no_leaks().unwrap();
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn awaiting_an_advanced_poll_settles_queued_work() {
    LocalSet::new()
        .run_until(async {
            TokioRunloop::install();
            set_should_poll(|| false);
            let feed = Rc::new(Feed::default());

            let owner = Rc::downgrade(&feed);
            let token = poll_task(
                &feed,
                PollTask::call(move |f: &Feed, next| {
                    f.fetches.set(f.fetches.get() + 1);
                    if let Some(owner) = owner.upgrade() {
                        schedule_task(
                            &owner,
                            "render",
                            Task::call(|f: &Feed| f.renders.set(f.renders.get() + 1)),
                        )
                        .unwrap();
                    }
                    next.call();
                }),
                None,
            )
            .unwrap();

            advance_poll(&token).unwrap().await;
            assert_eq!(feed.fetches.get(), 2);
            assert_eq!(feed.renders.get(), 2);

            destroy(&feed);
            assert_no_leaks().unwrap();
        })
        .await;
}
