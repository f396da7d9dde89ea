use dioxus::prelude::*;
use futures_util::StreamExt;

use crate::socket::{ConnectionState, EventKind};
use crate::transports::Transports;

/// The shared socket's connection state, refreshed on connect, disconnect
/// and connection errors.
pub fn use_connection_state() -> Signal<ConnectionState> {
    let transports = use_context::<Transports>();
    let socket = transports.socket.clone();
    let subscriptions = use_hook(move || {
        let (tx, mut rx) = futures_channel::mpsc::unbounded::<()>();
        let subscriptions: Vec<_> = [
            EventKind::Connect,
            EventKind::Disconnect,
            EventKind::ConnectionError,
            EventKind::SocketError,
        ]
        .into_iter()
        .map(|kind| {
            let tx = tx.clone();
            socket.add_listener(kind, move |_| {
                let _ = tx.unbounded_send(());
            })
        })
        .collect();

        let mut state = Signal::new(socket.state());
        let reader = socket.clone();
        spawn(async move {
            while rx.next().await.is_some() {
                state.set(reader.state());
            }
        });
        (state, subscriptions)
    });

    let (state, _) = subscriptions.clone();
    use_drop(move || {
        let (_, subscriptions) = subscriptions;
        for subscription in &subscriptions {
            transports.socket.remove_listener(subscription);
        }
    });
    state
}
