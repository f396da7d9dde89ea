use std::rc::Rc;

use dioxus::prelude::*;
use serde_json::Value;
use tokio::sync::watch;

use crate::acquisition::{
    Acquisition, AcquisitionKind, AcquisitionResult, AnalysisRunner, DataLoader, SpectralLookup,
};
use crate::transports::Transports;

/// Provide the transports to every hook below this component.
pub fn use_transports_provider(init: impl FnOnce() -> Transports) -> Transports {
    use_context_provider(init)
}

/// Mirror a state channel into a signal owned by the current scope.
fn use_mirrored(
    subscribe: impl FnOnce() -> watch::Receiver<AcquisitionResult>,
) -> Signal<AcquisitionResult> {
    use_hook(move || {
        let mut rx = subscribe();
        let mut signal = Signal::new(rx.borrow_and_update().clone());
        spawn(async move {
            while rx.changed().await.is_ok() {
                let next = rx.borrow_and_update().clone();
                signal.set(next);
            }
        });
        signal
    })
}

fn use_acquisition(kind: AcquisitionKind) -> Signal<AcquisitionResult> {
    let transports = use_context::<Transports>();
    let handle = use_hook(move || Rc::new(Acquisition::new(kind).mount(&transports)));
    let state = use_mirrored({
        let handle = handle.clone();
        move || handle.subscribe()
    });
    use_drop(move || handle.unmount());
    state
}

/// The dashboard snapshot, socket first.
pub fn use_initial_data() -> Signal<AcquisitionResult> {
    use_acquisition(AcquisitionKind::InitialData)
}

/// IoT readings, socket first.
pub fn use_iot_data() -> Signal<AcquisitionResult> {
    use_acquisition(AcquisitionKind::IotData)
}

/// The prediction map, socket first.
pub fn use_prediction_map() -> Signal<AcquisitionResult> {
    use_acquisition(AcquisitionKind::PredictionMap)
}

#[derive(Clone)]
pub struct UseApiData {
    pub state: Signal<AcquisitionResult>,
    loader: Rc<DataLoader>,
}

impl UseApiData {
    pub fn retry_fetch(&self) {
        self.loader.retry_fetch();
    }
}

/// Snapshot plus analysis over the request transport, with retries.
pub fn use_api_data() -> UseApiData {
    let transports = use_context::<Transports>();
    let loader = use_hook(move || Rc::new(DataLoader::mount(&transports)));
    let state = use_mirrored({
        let loader = loader.clone();
        move || loader.subscribe()
    });
    {
        let loader = loader.clone();
        use_drop(move || loader.unmount());
    }
    UseApiData { state, loader }
}

#[derive(Clone)]
pub struct UseRunAnalysis {
    pub state: Signal<AcquisitionResult>,
    runner: Rc<AnalysisRunner>,
}

impl UseRunAnalysis {
    /// Run the analysis in the background; progress lands in `state`.
    pub fn run(&self) {
        let runner = self.runner.clone();
        spawn(async move {
            runner.run().await;
        });
    }

    pub async fn run_and_wait(&self) -> Option<Value> {
        self.runner.run().await
    }
}

pub fn use_run_analysis() -> UseRunAnalysis {
    let transports = use_context::<Transports>();
    let runner = use_hook(move || Rc::new(AnalysisRunner::new(&transports)));
    let state = use_mirrored({
        let runner = runner.clone();
        move || runner.subscribe()
    });
    {
        let runner = runner.clone();
        use_drop(move || runner.unmount());
    }
    UseRunAnalysis { state, runner }
}

#[derive(Clone)]
pub struct UseSpectralSignature {
    pub state: Signal<AcquisitionResult>,
    lookup: Rc<SpectralLookup>,
}

impl UseSpectralSignature {
    /// Look up the signature of pixel `(x, y)` in the background.
    pub fn get_signature(&self, x: u32, y: u32, crop_type: Option<String>) {
        let lookup = self.lookup.clone();
        spawn(async move {
            lookup.get_signature(x, y, crop_type.as_deref()).await;
        });
    }
}

pub fn use_spectral_signature() -> UseSpectralSignature {
    let transports = use_context::<Transports>();
    let lookup = use_hook(move || Rc::new(SpectralLookup::new(&transports)));
    let state = use_mirrored({
        let lookup = lookup.clone();
        move || lookup.subscribe()
    });
    {
        let lookup = lookup.clone();
        use_drop(move || lookup.unmount());
    }
    UseSpectralSignature { state, lookup }
}
