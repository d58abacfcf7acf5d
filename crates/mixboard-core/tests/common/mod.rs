//! In-memory host graph for integration tests: a mock client and a mock
//! process cycle, so the full mixer stack runs without a JACK server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use mixboard_core::{
    Engine, Error, GraphBackend, GraphClient, MidiEvent, Mixer, MixerConfig, PortDirection,
    PortId, ProcessCycle, Result, Sample,
};

pub const BUFFER_SIZE: u32 = 1024;

/// Port-name directory shared between the mock client and the tests.
pub type PortNames = Arc<Mutex<HashMap<u32, String>>>;

pub struct MockGraph {
    names: PortNames,
    next_id: u32,
    sample_rate: u32,
    buffer_size: u32,
    /// Countdown injected by tests: when it hits 1, the next registration
    /// fails.
    fail_register_after: Arc<AtomicUsize>,
}

impl GraphClient for MockGraph {
    fn register_port(&mut self, name: &str, _direction: PortDirection) -> Result<PortId> {
        let countdown = self.fail_register_after.load(Ordering::Relaxed);
        if countdown > 0 {
            self.fail_register_after
                .store(countdown - 1, Ordering::Relaxed);
            if countdown == 1 {
                return Err(Error::PortRegister);
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        self.names.lock().unwrap().insert(id, name.into());
        Ok(PortId(id))
    }

    fn unregister_port(&mut self, port: PortId) {
        self.names.lock().unwrap().remove(&port.0);
    }

    fn rename_port(&mut self, port: PortId, name: &str) -> Result<()> {
        self.names.lock().unwrap().insert(port.0, name.into());
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn buffer_size(&self) -> u32 {
        self.buffer_size
    }
}

pub struct MockBackend {
    engine_out: Arc<Mutex<Option<Engine>>>,
    names: PortNames,
    sample_rate: u32,
    buffer_size: u32,
    fail_register_after: Arc<AtomicUsize>,
}

impl GraphBackend for MockBackend {
    type Client = MockGraph;

    fn launch(self, _client_name: &str, mut engine: Engine) -> Result<MockGraph> {
        engine.init_timing(self.sample_rate, self.buffer_size);
        *self.engine_out.lock().unwrap() = Some(engine);
        Ok(MockGraph {
            names: self.names,
            next_id: 0,
            sample_rate: self.sample_rate,
            buffer_size: self.buffer_size,
            fail_register_after: self.fail_register_after,
        })
    }
}

/// A mixer plus direct access to its engine, driven manually by tests.
pub struct Rig {
    pub mixer: Mixer,
    pub engine: Engine,
    pub names: PortNames,
    fail_register_after: Arc<AtomicUsize>,
}

pub fn rig(config: MixerConfig) -> Rig {
    let engine_out = Arc::new(Mutex::new(None));
    let names: PortNames = Arc::new(Mutex::new(HashMap::new()));
    let fail_register_after = Arc::new(AtomicUsize::new(0));
    let backend = MockBackend {
        engine_out: Arc::clone(&engine_out),
        names: Arc::clone(&names),
        sample_rate: 48000,
        buffer_size: BUFFER_SIZE,
        fail_register_after: Arc::clone(&fail_register_after),
    };
    let mixer = Mixer::new(config, backend).expect("mixer construction");
    let engine = engine_out.lock().unwrap().take().expect("engine");
    Rig {
        mixer,
        engine,
        names,
        fail_register_after,
    }
}

impl Rig {
    pub fn port(&self, name: &str) -> PortId {
        let names = self.names.lock().unwrap();
        let id = names
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(id, _)| *id)
            .unwrap_or_else(|| panic!("no port named {name:?}"));
        PortId(id)
    }

    pub fn port_exists(&self, name: &str) -> bool {
        self.names
            .lock()
            .unwrap()
            .values()
            .any(|n| n.as_str() == name)
    }

    /// Make the `nth` upcoming port registration fail (1 = the next one).
    pub fn fail_register(&self, nth: usize) {
        self.fail_register_after.store(nth, Ordering::Relaxed);
    }

    /// Run one silent period, long enough for every pending ramp to settle.
    pub fn settle(&mut self) {
        let mut cycle = MockCycle::new(BUFFER_SIZE as usize);
        self.engine.run_cycle(&mut cycle);
    }
}

/// One fabricated process period.
pub struct MockCycle {
    pub frames: usize,
    pub captures: HashMap<u32, Vec<Sample>>,
    pub playbacks: HashMap<u32, Vec<Sample>>,
    pub connected: Vec<u32>,
    pub midi_in: Vec<MidiEvent>,
    pub midi_out: Vec<[u8; 3]>,
}

impl MockCycle {
    pub fn new(frames: usize) -> Self {
        Self {
            frames,
            captures: HashMap::new(),
            playbacks: HashMap::new(),
            connected: Vec::new(),
            midi_in: Vec::new(),
            midi_out: Vec::new(),
        }
    }

    pub fn feed(mut self, port: PortId, data: &[Sample]) -> Self {
        self.captures.insert(port.0, data.to_vec());
        self
    }

    /// Feed a constant signal for the whole period.
    pub fn feed_constant(self, port: PortId, level: Sample) -> Self {
        let frames = self.frames;
        self.feed(port, &vec![level; frames])
    }

    pub fn connect(mut self, port: PortId) -> Self {
        self.connected.push(port.0);
        self
    }

    pub fn cc(mut self, cc: u8, value: u8) -> Self {
        self.midi_in.push(MidiEvent::control_change(cc, value));
        self
    }

    pub fn played(&self, port: PortId) -> &[Sample] {
        self.playbacks
            .get(&port.0)
            .map(|v| v.as_slice())
            .unwrap_or_else(|| panic!("nothing played to port {}", port.0))
    }

    pub fn was_played(&self, port: PortId) -> bool {
        self.playbacks.contains_key(&port.0)
    }
}

impl ProcessCycle for MockCycle {
    fn frames(&self) -> usize {
        self.frames
    }

    fn capture(&self, port: PortId) -> &[Sample] {
        self.captures
            .get(&port.0)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    fn playback(&mut self, port: PortId, data: &[Sample]) {
        self.playbacks.insert(port.0, data.to_vec());
    }

    fn silence(&mut self, port: PortId) {
        let frames = self.frames;
        self.playbacks.insert(port.0, vec![0.0; frames]);
    }

    fn connected(&self, port: PortId) -> bool {
        self.connected.contains(&port.0)
    }

    fn midi_in(&self) -> &[MidiEvent] {
        &self.midi_in
    }

    fn midi_out(&mut self, data: [u8; 3]) -> bool {
        self.midi_out.push(data);
        true
    }
}
