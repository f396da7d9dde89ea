mod common;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use common::{harness, snapshot, ScriptedApi};
use dioxus::prelude::*;
use fieldprime_client::hooks::{use_connection_state, use_initial_data};
use fieldprime_client::{AcquisitionResult, ConnectionState, ConnectionType, EventKind};

type Captured = Rc<RefCell<Option<(Signal<ConnectionState>, Signal<AcquisitionResult>)>>>;

fn dashboard(captured: Captured) -> Element {
    let connection = use_connection_state();
    let data = use_initial_data();
    *captured.borrow_mut() = Some((connection, data));
    let loading = data.read().is_loading;
    rsx! {
        div { "{loading}" }
    }
}

#[tokio::test(start_paused = true)]
async fn test_hooks_mount_and_release_on_drop() {
    let api = ScriptedApi::new();
    api.push_snapshot(Ok(snapshot()));
    let h = harness(api);
    let events = h.transports.socket.events().clone();

    let captured = Captured::default();
    let mut dom = VirtualDom::new_with_props(dashboard, captured.clone())
        .with_root_context(h.transports.clone());
    dom.rebuild_in_place();

    // Connection hook plus one acquisition.
    assert_eq!(events.listener_count(&EventKind::Connect), 1);
    assert_eq!(events.listener_count(&EventKind::Disconnect), 1);
    assert_eq!(events.listener_count(&EventKind::InitialData), 1);
    assert_eq!(events.listener_count(&EventKind::ConnectionError), 2);
    assert_eq!(events.listener_count(&EventKind::SocketError), 2);

    let (connection, data) = (*captured.borrow()).expect("dashboard rendered");
    assert!(dom.in_runtime(|| data.peek().is_loading));
    assert!(!dom.in_runtime(|| connection.peek().is_connected()));

    drop(dom);
    assert_eq!(events.listener_count(&EventKind::Connect), 0);
    assert_eq!(events.listener_count(&EventKind::Disconnect), 0);

    // The acquisition's driver releases its listeners on its own task.
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(events.listener_count(&EventKind::InitialData), 0);
    assert_eq!(events.listener_count(&EventKind::ConnectionError), 0);
    assert_eq!(events.listener_count(&EventKind::SocketError), 0);

    // Unmounted before the socket wait ran out: no fallback.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.api.snapshot_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_initial_data_signal_follows_fallback() {
    let api = ScriptedApi::new();
    api.push_snapshot(Ok(snapshot()));
    let h = harness(api);

    let captured = Captured::default();
    let mut dom = VirtualDom::new_with_props(dashboard, captured.clone())
        .with_root_context(h.transports.clone());
    dom.rebuild_in_place();
    let (_, data) = (*captured.borrow()).expect("dashboard rendered");

    tokio::time::timeout(Duration::from_secs(30), async {
        while dom.in_runtime(|| data.peek().is_loading) {
            dom.wait_for_work().await;
            dom.render_immediate_to_vec();
        }
    })
    .await
    .expect("signal settles once the fallback answers");

    let result = dom.in_runtime(|| data.peek().clone());
    assert_eq!(result.data, Some(snapshot()));
    assert_eq!(result.connection_type, ConnectionType::Request);
    assert_eq!(h.api.snapshot_calls(), 1);
}
