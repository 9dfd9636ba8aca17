use lifeline::testing::TestTarget;
use lifeline::{
    add_event_listener, debounce_task_with, run_all_disposers, run_task, task_methods,
    Destroyable, Event, Listener, TokioRunloop,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;
use tokio::task::LocalSet;

/// A search box that only queries once typing pauses for 200ms
#[derive(Default)]
struct SearchBox {
    destroying: Cell<bool>,
    results: RefCell<Vec<String>>,
}

impl Destroyable for SearchBox {
    fn is_destroying(&self) -> bool {
        self.destroying.get()
    }
}

#[task_methods]
impl SearchBox {
    #[task]
    fn clear(&self) {
        self.results.borrow_mut().clear();
    }

    fn search(&self, query: &str) {
        println!("[SEARCH] querying backend for {:?}", query);
        self.results.borrow_mut().push(query.to_string());
    }
}

fn on_input(owner: &Rc<SearchBox>) -> Listener<SearchBox> {
    let owner = Rc::downgrade(owner);
    Rc::new(move |_: &SearchBox, event: &Event| {
        let Some(owner) = owner.upgrade() else { return };
        let query = event.detail::<String>().cloned().unwrap_or_default();
        if let Err(err) = debounce_task_with(&owner, "search", move |s: &SearchBox| s.search(&query), 200u64) {
            eprintln!("debounce failed: {err}");
        }
    })
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "debug".to_string()))
        .with_target(false)
        .init();

    LocalSet::new()
        .run_until(async {
            TokioRunloop::install();
            let search = Rc::new(SearchBox::default());
            let input = Rc::new(TestTarget::new());
            add_event_listener(&search, &input, "input", &on_input(&search), None)?;

            println!("Typing \"rust\" one key every 50ms...");
            for query in ["r", "ru", "rus", "rust"] {
                input.dispatch(&Event::with_detail("input", query.to_string()));
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            tokio::time::sleep(Duration::from_millis(300)).await;
            println!("Queries sent: {:?}", search.results.borrow());

            run_task(&search, "clear", Duration::from_millis(10))?;
            tokio::time::sleep(Duration::from_millis(20)).await;
            println!("Cleared; queries kept: {}", search.results.borrow().len());

            println!("Typing again, then tearing the search box down mid-debounce...");
            input.dispatch(&Event::with_detail("input", "tokio".to_string()));
            search.destroying.set(true);
            run_all_disposers(&search);
            tokio::time::sleep(Duration::from_millis(300)).await;

            println!("Queries sent: {:?}", search.results.borrow());
            println!("Listeners left on the input: {}", input.listener_count("input"));
            Ok::<_, Box<dyn std::error::Error>>(())
        })
        .await
}
