//! core-pipeline: hosts the two-stage pipeline on dedicated worker threads.
//!
//! The buffering worker pulls from the input channel and drives the
//! buffering engine; the mapping worker pulls from the mapping channel and
//! drives the mapping engine into the platform sink. The only suspension
//! points are the channel receives: the buffering worker waits with the
//! engine's deadline while an interpretation is pending, and ticks the
//! engine when the deadline passes without input.

use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;

use core_buffering::{Engine as BufferingEngine, ImProbe};
use core_events::{Channel, InputEvent, MappingEvent, MappingSender};
use core_layout::KeySink;
use core_mapping::Engine as MappingEngine;
use tracing::info;

/// The assembled pipeline. Closing is ordered and idempotent; dropping
/// closes.
pub struct Keyboard {
    buffering_channel: Arc<Channel<InputEvent>>,
    mapping_channel: Arc<Channel<MappingEvent>>,
    buffering_thread: Option<JoinHandle<()>>,
    mapping_thread: Option<JoinHandle<()>>,
}

impl Keyboard {
    /// Spawn both workers. The sink is owned by the mapping worker; it is
    /// the platform's emission backend.
    pub fn open(sink: Box<dyn KeySink + Send>) -> io::Result<Self> {
        Self::open_with_probe(sink, None)
    }

    /// As [`open`](Self::open), with a host-supplied IME status probe for
    /// configs that use `auto_layout`.
    pub fn open_with_probe(
        sink: Box<dyn KeySink + Send>,
        im_probe: Option<ImProbe>,
    ) -> io::Result<Self> {
        let buffering_channel: Arc<Channel<InputEvent>> = Arc::new(Channel::new());
        let mapping_channel: Arc<Channel<MappingEvent>> = Arc::new(Channel::new());

        let buffering_thread = {
            let input = Arc::clone(&buffering_channel);
            let output = MappingSender::new(Arc::clone(&mapping_channel));
            std::thread::Builder::new()
                .name("fujinami-buffering".into())
                .spawn(move || run_buffering(input, output, im_probe))?
        };

        let mapping_thread = {
            let input = Arc::clone(&mapping_channel);
            std::thread::Builder::new()
                .name("fujinami-mapping".into())
                .spawn(move || run_mapping(input, sink))?
        };

        Ok(Self {
            buffering_channel,
            mapping_channel,
            buffering_thread: Some(buffering_thread),
            mapping_thread: Some(mapping_thread),
        })
    }

    /// Non-blocking enqueue from the capture hook. False once closed.
    pub fn send_event(&self, event: InputEvent) -> bool {
        self.buffering_channel.send(event)
    }

    /// Shutdown order matters: the buffering worker drains and stops
    /// producing before the mapping channel closes, so no committed chord is
    /// lost; the mapping worker releases any outstanding command on exit.
    pub fn close(&mut self) {
        if let Some(thread) = self.buffering_thread.take() {
            self.buffering_channel.close();
            let _ = thread.join();
            self.buffering_channel.reset();
        }
        if let Some(thread) = self.mapping_thread.take() {
            self.mapping_channel.close();
            let _ = thread.join();
            self.mapping_channel.reset();
        }
    }
}

impl Drop for Keyboard {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_buffering(
    input: Arc<Channel<InputEvent>>,
    output: MappingSender,
    im_probe: Option<ImProbe>,
) {
    info!(target: "pipeline", "buffering worker started");
    let mut engine = BufferingEngine::new();
    if let Some(probe) = im_probe {
        engine.set_im_probe(probe);
    }

    loop {
        if engine.is_idle() {
            let received = match engine.timeout_tp() {
                Some(deadline) => input.receive_deadline(deadline),
                None => input.receive(),
            };
            match received {
                Some(event) => engine.update_event(event, &output),
                None => {
                    if input.is_closed() {
                        break;
                    }
                    // Deadline wake-up: let the active flow observe time.
                    engine.update(&output);
                }
            }
        } else {
            engine.update(&output);
        }
    }

    info!(target: "pipeline", "buffering worker stopped");
}

fn run_mapping(input: Arc<Channel<MappingEvent>>, mut sink: Box<dyn KeySink + Send>) {
    info!(target: "pipeline", "mapping worker started");
    let mut engine = MappingEngine::new();

    while let Some(event) = input.receive() {
        engine.update(event, sink.as_mut());
    }
    // Channel closed and drained: release whatever is still held.
    engine.reset(sink.as_mut());

    info!(target: "pipeline", "mapping worker stopped");
}
