use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};

use futures::{future::BoxFuture, FutureExt};
use keel_di::{
    AsyncReady, Close, Component, Dependencies, DynError, InjectError, Key, Provider,
    ReadyContext, ReadyState, Runtime, RuntimeOptions,
};

type Log = Arc<Mutex<Vec<&'static str>>>;

/// Records its readiness and release in a shared log
struct Service {
    name: &'static str,
    log: Log,
    fail_ready: bool,
    saw_itself: AtomicBool,
}

impl AsyncReady for Service {
    fn async_ready(&self, cx: ReadyContext) -> BoxFuture<'_, Result<(), DynError>> {
        async move {
            // Looking ourselves up while not ready yet yields ourselves
            let me = cx.get_instance(&cx.key().clone().not_ready()).await?;
            let me = me.get::<Service>()?;
            self.saw_itself
                .store(std::ptr::eq(me.as_ref(), self), Ordering::SeqCst);

            self.log.lock().unwrap().push(self.name);
            if self.fail_ready {
                return Err(format!("{} is not ready", self.name).into());
            }
            Ok(())
        }
        .boxed()
    }
}

impl Close for Service {
    fn close(&self) -> Result<(), DynError> {
        self.log.lock().unwrap().push(self.name);
        Ok(())
    }
}

impl Component for Service {
    fn ready_hook(&self) -> Option<&dyn AsyncReady> {
        Some(self)
    }

    fn release_hook(&self) -> Option<&dyn Close> {
        Some(self)
    }
}

fn service(name: &'static str, log: &Log, depends_on: Option<&'static str>) -> Provider {
    let dependencies = match depends_on {
        Some(dependency) => {
            Dependencies::new().add_key::<Arc<Service>>("dependency", Key::named(dependency))
        }
        None => Dependencies::new(),
    };
    let log = log.clone();
    Provider::component_function(Key::named(name), dependencies, move |_| {
        let log = log.clone();
        async move {
            Ok::<_, DynError>(Service {
                name,
                log,
                fail_ready: false,
                saw_itself: AtomicBool::new(false),
            })
        }
    })
}

#[tokio::test]
async fn dependencies_become_ready_first() {
    let log = Log::default();
    let runtime = Runtime::default();
    let root = runtime.root();
    root.add_provider(service("database", &log, None)).unwrap();
    root.add_provider(service("api", &log, Some("database"))).unwrap();

    let api = root.get_instance_async(&Key::named("api")).await.unwrap();

    assert_eq!(api.ready_state(), ReadyState::Ready);
    assert_eq!(*log.lock().unwrap(), vec!["database", "api"]);
    assert!(api.get::<Service>().unwrap().saw_itself.load(Ordering::SeqCst));
}

#[tokio::test]
async fn not_ready_requests_skip_the_hook() {
    let log = Log::default();
    let runtime = Runtime::default();
    let root = runtime.root();
    root.add_provider(service("database", &log, None)).unwrap();

    let database = root
        .get_instance_async(&Key::named("database").not_ready())
        .await
        .unwrap();
    assert_eq!(database.ready_state(), ReadyState::NotReady);
    assert!(log.lock().unwrap().is_empty());

    root.make_ready(&database).await.unwrap();
    root.make_ready(&database).await.unwrap();
    assert_eq!(database.ready_state(), ReadyState::Ready);
    assert_eq!(*log.lock().unwrap(), vec!["database"]);
}

#[tokio::test]
async fn default_readiness_follows_the_runtime_option() {
    let log = Log::default();
    let runtime = Runtime::new(RuntimeOptions::default().with_ready_by_default(false));
    let root = runtime.root();
    root.add_provider(service("database", &log, None)).unwrap();

    let database = root.get_instance_async(&Key::named("database")).await.unwrap();
    assert_eq!(database.ready_state(), ReadyState::NotReady);

    let database = root
        .get_instance_async(&Key::named("database").require_ready())
        .await
        .unwrap();
    assert_eq!(database.ready_state(), ReadyState::Ready);
}

#[tokio::test]
async fn failed_readiness_is_retried_with_a_new_instance() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let log = Log::default();
    let runtime = Runtime::new(RuntimeOptions::default().with_log_failures(false));
    let root = runtime.root();

    let counter = attempts.clone();
    let hook_log = log.clone();
    root.add_provider(Provider::component_function(
        Key::named("flaky"),
        Dependencies::new(),
        move |_| {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            let log = hook_log.clone();
            async move {
                Ok::<_, DynError>(Service {
                    name: "flaky",
                    log,
                    fail_ready: attempt == 0,
                    saw_itself: AtomicBool::new(false),
                })
            }
        },
    ))
    .unwrap();

    let error = root
        .get_instance_async(&Key::named("flaky"))
        .await
        .unwrap_err();
    assert!(matches!(error, InjectError::ReadinessFailed { .. }));
    // The failed instance was released
    assert_eq!(*log.lock().unwrap(), vec!["flaky", "flaky"]);

    let flaky = root.get_instance_async(&Key::named("flaky")).await.unwrap();
    assert_eq!(flaky.ready_state(), ReadyState::Ready);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

/// Release only, no readiness hook
struct Resource {
    name: &'static str,
    log: Log,
}

impl Close for Resource {
    fn close(&self) -> Result<(), DynError> {
        self.log.lock().unwrap().push(self.name);
        Ok(())
    }
}

impl Component for Resource {
    fn release_hook(&self) -> Option<&dyn Close> {
        Some(self)
    }
}

fn resource(name: &'static str, log: &Log, depends_on: Option<&'static str>) -> Provider {
    let dependencies = match depends_on {
        Some(dependency) => {
            Dependencies::new().add_key::<Arc<Resource>>("dependency", Key::named(dependency))
        }
        None => Dependencies::new(),
    };
    let log = log.clone();
    Provider::component_function(Key::named(name), dependencies, move |_| {
        let log = log.clone();
        async move { Ok::<_, DynError>(Resource { name, log }) }
    })
}

#[tokio::test]
async fn teardown_releases_in_reverse_construction_order() {
    let log = Log::default();
    let runtime = Runtime::default();
    let root = runtime.root();
    root.add_provider(resource("a", &log, None)).unwrap();
    root.add_provider(resource("b", &log, Some("a")).no_close())
        .unwrap();
    root.add_provider(resource("c", &log, Some("b"))).unwrap();

    let c = root.get_instance_async(&Key::named("c")).await.unwrap();
    let b = root.get_instance_async(&Key::named("b")).await.unwrap();

    runtime.shutdown().unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["c", "a"]);
    assert_eq!(c.ready_state(), ReadyState::Closed);
    assert_eq!(b.ready_state(), ReadyState::Ready);
}

#[tokio::test]
async fn closing_a_child_keeps_the_parent() {
    let log = Log::default();
    let runtime = Runtime::default();
    let root = runtime.root();
    let child = root.child("request").unwrap();
    root.add_provider(resource("pool", &log, None)).unwrap();
    child
        .add_provider(resource("session", &log, Some("pool")))
        .unwrap();

    child
        .get_instance_async(&Key::named("session"))
        .await
        .unwrap();
    child.close().unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["session"]);
    assert!(!root.is_closed());
    assert!(matches!(
        child.get_instance_async(&Key::named("session")).await,
        Err(InjectError::ScopeClosed(_))
    ));

    let pool = root.get_instance_async(&Key::named("pool")).await.unwrap();
    assert_eq!(pool.ready_state(), ReadyState::Ready);
}

#[tokio::test]
async fn replaced_registrations_are_still_released() {
    let log = Log::default();
    let runtime = Runtime::default();
    let root = runtime.root();
    root.add_provider(resource("first", &log, None)).unwrap();
    root.get_instance_async(&Key::named("first")).await.unwrap();

    // Same key, new producer
    let replacement = log.clone();
    root.add_provider(Provider::component_function(
        Key::named("first"),
        Dependencies::new(),
        move |_| {
            let log = replacement.clone();
            async move {
                Ok::<_, DynError>(Resource {
                    name: "second",
                    log,
                })
            }
        },
    ))
    .unwrap();
    root.get_instance_async(&Key::named("first")).await.unwrap();

    runtime.shutdown().unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["second", "first"]);
}
