use std::sync::Arc;
use std::time::Instant;

use core_events::{InputEvent, MappingSender};
use core_keys::Key;
use core_layout::{FlowType, KeyboardConfig, KeyboardLayout};
use tracing::{debug, trace};

use crate::flow::{
    DeferredKeyFlow, DualKeyFlow, FlowResult, ImmediateKeyFlow, SimulKeyFlow,
};
use crate::state::State;

/// Host-supplied probe for the OS input-method status, consulted when
/// `auto_layout` is enabled.
pub type ImProbe = Box<dyn Fn() -> bool + Send>;

enum CurrentFlow {
    None,
    Immediate(ImmediateKeyFlow),
    Deferred(DeferredKeyFlow),
    Simul(SimulKeyFlow),
    Dual(DualKeyFlow),
}

/// The buffering engine: interprets raw key events into logical
/// press/repeat/release plus layout events on the mapping channel.
///
/// Driven by the host thread in two ways: `update_event` when an input
/// event arrives, `update` when the active flow's deadline passes without
/// one. Events are processed strictly in enqueue order.
pub struct Engine {
    default_layout: Option<Arc<KeyboardLayout>>,
    default_im_layout: Option<Arc<KeyboardLayout>>,
    auto_layout: bool,
    prev_im_status: bool,
    im_probe: Option<ImProbe>,
    state: State,
    flow: CurrentFlow,
}

impl Engine {
    pub fn new() -> Self {
        Self {
            default_layout: None,
            default_im_layout: None,
            auto_layout: false,
            prev_im_status: false,
            im_probe: None,
            state: State::new(),
            flow: CurrentFlow::None,
        }
    }

    pub fn set_im_probe(&mut self, probe: ImProbe) {
        self.im_probe = Some(probe);
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn update_event(&mut self, event: InputEvent, tx: &MappingSender) {
        self.state.push_event(event);
        self.update(tx);
    }

    /// One engine tick: dispatch the front event when no flow is active,
    /// otherwise let the flow look ahead; on completion emit the committed
    /// chord followed by the (possibly switched) layout.
    pub fn update(&mut self, tx: &MappingSender) {
        let mut flow = std::mem::replace(&mut self.flow, CurrentFlow::None);
        let result = match &mut flow {
            CurrentFlow::None => {
                self.dispatch_front(tx);
                return;
            }
            CurrentFlow::Immediate(f) => f.update(&mut self.state),
            CurrentFlow::Deferred(f) => f.update(&mut self.state),
            CurrentFlow::Simul(f) => f.update(&mut self.state),
            CurrentFlow::Dual(f) => f.update(&mut self.state),
        };
        match result {
            FlowResult::Continue => self.flow = flow,
            FlowResult::Done => self.finish_flow(tx),
        }
    }

    pub fn is_idle(&self) -> bool {
        match &self.flow {
            CurrentFlow::None => self.state.events().is_empty(),
            CurrentFlow::Immediate(f) => f.is_idle(&self.state),
            CurrentFlow::Deferred(f) => f.is_idle(&self.state),
            CurrentFlow::Simul(f) => f.is_idle(&self.state),
            CurrentFlow::Dual(f) => f.is_idle(&self.state),
        }
    }

    /// Deadline for the host's timed receive; `None` means wait for input.
    pub fn timeout_tp(&self) -> Option<Instant> {
        match &self.flow {
            CurrentFlow::None => None,
            CurrentFlow::Immediate(f) => f.timeout_tp(),
            CurrentFlow::Deferred(f) => f.timeout_tp(),
            CurrentFlow::Simul(f) => f.timeout_tp(),
            CurrentFlow::Dual(f) => f.timeout_tp(),
        }
    }

    pub fn reset(&mut self) {
        self.default_layout = None;
        self.default_im_layout = None;
        self.auto_layout = false;
        self.prev_im_status = false;
        self.state.reset(None);
        self.flow = CurrentFlow::None;
    }

    fn finish_flow(&mut self, tx: &MappingSender) {
        self.state.set_next_layout();
        tx.send_press(self.state.active_keyset(), self.state.layout());
    }

    fn dispatch_front(&mut self, tx: &MappingSender) {
        let Some(front) = self.state.events().front().cloned() else {
            return;
        };
        match front {
            InputEvent::KeyPress { key, .. } => self.dispatch_key_press(key, tx),
            InputEvent::KeyRelease { key, .. } => self.dispatch_key_release(key, tx),
            InputEvent::DefaultLayout {
                default,
                default_im,
            } => self.install_default_layouts(default, default_im, tx),
            InputEvent::Control(config) => self.install_config(config, tx),
        }
    }

    fn dispatch_key_press(&mut self, key: Key, tx: &MappingSender) {
        debug!(target: "buffering.engine", %key, "press");

        if !self.state.trigger_keyset().is_empty() && self.state.active_keyset().contains(key) {
            // System key repeat of the active chord.
            trace!(target: "buffering.engine", keyset = ?self.state.active_keyset(), "repeat");
            tx.send_repeat(self.state.active_keyset());
            self.state.pop_event();
            return;
        }

        if self.state.dontcare_keyset().contains(key) {
            trace!(target: "buffering.engine", %key, "ignore");
            self.state.pop_event();
            return;
        }

        self.poll_im_status(tx);

        let flow_type = self
            .state
            .find_key_property(key)
            .map(|p| p.flow_type())
            .unwrap_or(FlowType::Unknown);
        if flow_type == FlowType::Unknown {
            trace!(target: "buffering.engine", %key, "press unregistered key");
            self.state.press_none_key(key);
            self.state.pop_event();
            return;
        }

        trace!(target: "buffering.engine", ?flow_type, "reset flow");
        let started = match flow_type {
            FlowType::Immediate => {
                ImmediateKeyFlow::reset(&mut self.state).map(CurrentFlow::Immediate)
            }
            FlowType::Deferred => {
                DeferredKeyFlow::reset(&mut self.state).map(CurrentFlow::Deferred)
            }
            FlowType::Simul => SimulKeyFlow::reset(&mut self.state).map(CurrentFlow::Simul),
            FlowType::Dual => DualKeyFlow::reset(&mut self.state).map(CurrentFlow::Dual),
            FlowType::Unknown => None,
        };
        match started {
            Some(flow) => self.flow = flow,
            None => self.finish_flow(tx),
        }
    }

    fn dispatch_key_release(&mut self, key: Key, tx: &MappingSender) {
        debug!(target: "buffering.engine", %key, "release");

        if self.state.try_release_trigger_key(key) {
            trace!(target: "buffering.engine", "release trigger key");
            tx.send_release(self.state.active_keyset());
        } else if self.state.try_release_modifier_key(key) {
            trace!(target: "buffering.engine", "release modifier key");
            // While the chord is still held, modifier releases stay silent.
            if self.state.trigger_keyset().is_empty() {
                tx.send_release(self.state.active_keyset());
            }
        } else if self.state.try_release_dontcare_key(key) {
            trace!(target: "buffering.engine", "release dontcare key");
        } else {
            trace!(target: "buffering.engine", "release other key");
        }
        self.state.pop_event();
    }

    fn install_default_layouts(
        &mut self,
        default: Arc<KeyboardLayout>,
        default_im: Option<Arc<KeyboardLayout>>,
        tx: &MappingSender,
    ) {
        trace!(target: "buffering.engine", layout = default.name(), "default layout");
        self.default_layout = Some(Arc::clone(&default));
        self.default_im_layout = default_im;
        self.prev_im_status = false;
        self.state.set_layout(Some(default));
        tx.send_layout(self.state.layout());
        self.state.pop_event();
    }

    fn install_config(&mut self, config: Option<Arc<KeyboardConfig>>, tx: &MappingSender) {
        trace!(target: "buffering.engine", installed = config.is_some(), "control");
        match config {
            Some(config) => {
                self.default_layout = config.default_layout().cloned();
                self.default_im_layout = config.default_im_layout().cloned();
                self.auto_layout = config.auto_layout();
                self.prev_im_status = false;
                self.state.reset(Some(config));
                tx.send_layout(self.state.layout());
            }
            None => {
                self.default_layout = None;
                self.default_im_layout = None;
                self.auto_layout = false;
                self.prev_im_status = false;
                self.state.reset(None);
                tx.send_layout(None);
            }
        }
        self.state.pop_event();
    }

    /// Track IM toggles and swap between the default layouts accordingly.
    fn poll_im_status(&mut self, tx: &MappingSender) {
        if !self.auto_layout {
            return;
        }
        let Some(probe) = &self.im_probe else {
            return;
        };
        let im_status = probe();
        if self.prev_im_status && !im_status {
            trace!(target: "buffering.engine", "IM is disabled");
            self.state.set_layout(self.default_layout.clone());
            tx.send_layout(self.default_layout.as_ref());
        } else if !self.prev_im_status && im_status {
            trace!(target: "buffering.engine", "IM is enabled");
            self.state.set_layout(self.default_im_layout.clone());
            tx.send_layout(self.default_im_layout.as_ref());
        }
        self.prev_im_status = im_status;
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
