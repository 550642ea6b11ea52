use std::sync::{Arc, Mutex};

use futures::{FutureExt, StreamExt};
use keel_di::{
    Dependencies, DynError, Event, EventKind, EventPayload, InjectError, Key, KeyPattern,
    Milestone, Provider, Runtime, RuntimeOptions, Target, TypeInfo,
};

struct Port(u16);
struct Server {
    port: Arc<Port>,
}

fn server() -> Provider {
    Provider::function(
        Key::of::<Server>(),
        Dependencies::new().add::<Arc<Port>>("port"),
        |args| async move {
            Ok::<_, DynError>(Server {
                port: args.get::<Arc<Port>>("port")?,
            })
        },
    )
}

/// Everything already delivered to `events`
fn drain(events: &mut futures_channel::mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
    let mut drained = Vec::new();
    while let Some(Some(event)) = events.next().now_or_never() {
        drained.push(event);
    }
    drained
}

#[tokio::test]
async fn construction_reports_progress_then_final() {
    let runtime = Runtime::default();
    let root = runtime.root();
    let child = root.child("child").unwrap();
    let mut events = root.subscribe(KeyPattern::Any, &EventKind::ALL);

    child.add_provider(Provider::value(Key::of::<Port>(), Port(80))).unwrap();
    child.add_provider(server()).unwrap();
    let server = child.get::<Server>().await.unwrap();
    assert_eq!(server.port.0, 80);

    let server_events: Vec<_> = drain(&mut events)
        .into_iter()
        .filter(|event| event.key == Key::of::<Server>())
        .collect();
    let kinds: Vec<_> = server_events.iter().map(Event::kind).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::AddProvider,
            EventKind::DependencyProgress,
            EventKind::DependencyProgress,
            EventKind::DependencyFinal,
        ]
    );
    assert!(matches!(
        &server_events[1].payload,
        EventPayload::Progress(Milestone::DependencyResolved(key)) if *key == Key::of::<Port>()
    ));
    assert!(matches!(
        server_events[2].payload,
        EventPayload::Progress(Milestone::Constructed)
    ));
    assert_eq!(server_events[3].scope, "child");
}

#[tokio::test]
async fn failures_are_delivered() {
    let runtime = Runtime::new(RuntimeOptions::default().with_log_failures(false));
    let root = runtime.root();
    let failures = Arc::new(Mutex::new(Vec::new()));

    let seen = failures.clone();
    root.add_event_listener(
        Key::of::<Server>(),
        &[EventKind::DependencyFailed],
        move |event| {
            if let EventPayload::Failed(error) = &event.payload {
                seen.lock().unwrap().push(error.clone());
            }
        },
    );

    root.add_provider(server()).unwrap();
    assert!(root.get::<Server>().await.is_err());

    let failures = failures.lock().unwrap();
    assert_eq!(failures.len(), 1);
    assert!(matches!(
        failures[0],
        InjectError::UnsatisfiedDependency { .. }
    ));
}

#[tokio::test]
async fn listeners_match_any_key_of_a_registration() {
    let runtime = Runtime::default();
    let root = runtime.root();
    let mut events = root.subscribe(Key::named("web"), &[EventKind::AddProvider]);

    root.add_provider(Provider::value(Key::of::<Port>(), Port(80)).also_provides(Key::named("web")))
        .unwrap();
    root.add_provider(Provider::value(Key::named("other"), 1u8))
        .unwrap();

    let delivered = drain(&mut events);
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].key, Key::named("web"));
    assert_eq!(delivered[0].keys, vec![Key::of::<Port>(), Key::named("web")]);
}

#[tokio::test]
async fn panicking_listener_does_not_break_registration() {
    let runtime = Runtime::default();
    let root = runtime.root();
    let calls = Arc::new(Mutex::new(0));

    root.add_event_listener(KeyPattern::Any, &[EventKind::AddProvider], |_| {
        panic!("listener bug")
    });
    let counter = calls.clone();
    let id = root.add_event_listener(KeyPattern::Any, &[EventKind::AddProvider], move |_| {
        *counter.lock().unwrap() += 1;
    });

    root.add_provider(Provider::value(Key::named("a"), 1u8)).unwrap();
    assert!(root.remove_event_listener(id));
    root.add_provider(Provider::value(Key::named("b"), 2u8)).unwrap();

    assert_eq!(*calls.lock().unwrap(), 1);
}

#[tokio::test]
async fn quiet_registrations_emit_nothing() {
    let runtime = Runtime::default();
    let root = runtime.root();
    let mut events = root.subscribe(KeyPattern::Any, &EventKind::ALL);

    root.add_provider(Provider::value(Key::named("hidden"), 1u8).quiet())
        .unwrap();
    root.get_instance_async(&Key::named("hidden")).await.unwrap();

    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn filter_instantiate_enumerates_constrained_keys() {
    let runtime = Runtime::default();
    let root = runtime.root();
    let site = root.child("site").unwrap();
    site.add_provider(Provider::value(
        Key::of::<Port>().with("service", "http"),
        Port(80),
    ))
    .unwrap();
    site.add_provider(Provider::value(
        Key::of::<Port>().with("service", "ssh"),
        Port(22),
    ))
    .unwrap();

    let found = site
        .filter_instantiate(&Target::Type(TypeInfo::of::<Port>()), &["service"], None)
        .await
        .unwrap();
    let ports: Vec<u16> = found
        .iter()
        .map(|found| found.instance.get::<Port>().unwrap().0)
        .collect();
    assert_eq!(ports, vec![80, 22]);

    let error = root
        .filter_instantiate(&Target::Type(TypeInfo::of::<Port>()), &["service"], Some(&site))
        .await
        .unwrap_err();
    assert!(matches!(error, InjectError::NotAnAncestor { .. }));
}
