//! The JACK process handler and its view of one period.

use crossbeam_channel::{Receiver, Sender};
use mixboard_core::{Engine, MidiEvent, PortId, ProcessCycle, Sample};

use crate::{MAX_MIDI_EVENTS, MAX_PORTS};

/// An owned audio port living on the process side.
pub(crate) enum PortEntry {
    Capture(jack::Port<jack::AudioIn>),
    Playback(jack::Port<jack::AudioOut>),
}

/// Control -> process port traffic. `Add` must arrive before any engine
/// command that references the id; sending both through bounded channels
/// drained at the cycle top preserves that order.
pub(crate) enum PortMsg {
    Add(PortId, PortEntry),
    Release(PortId),
}

pub(crate) struct PortTable {
    entries: Vec<Option<PortEntry>>,
}

impl PortTable {
    fn new() -> Self {
        Self {
            entries: (0..MAX_PORTS).map(|_| None).collect(),
        }
    }

    fn get(&self, port: PortId) -> Option<&PortEntry> {
        self.entries.get(port.0 as usize)?.as_ref()
    }

    fn get_mut(&mut self, port: PortId) -> Option<&mut PortEntry> {
        self.entries.get_mut(port.0 as usize)?.as_mut()
    }
}

/// The JACK process callback: owns the engine and the registered ports.
pub(crate) struct MixerProcess {
    engine: Engine,
    ports: PortTable,
    midi_in: jack::Port<jack::MidiIn>,
    midi_out: jack::Port<jack::MidiOut>,
    port_rx: Receiver<PortMsg>,
    port_reclaim: Sender<(PortId, PortEntry)>,
}

impl MixerProcess {
    pub(crate) fn new(
        engine: Engine,
        midi_in: jack::Port<jack::MidiIn>,
        midi_out: jack::Port<jack::MidiOut>,
        port_rx: Receiver<PortMsg>,
        port_reclaim: Sender<(PortId, PortEntry)>,
    ) -> Self {
        Self {
            engine,
            ports: PortTable::new(),
            midi_in,
            midi_out,
            port_rx,
            port_reclaim,
        }
    }

    fn drain_port_messages(&mut self) {
        while let Ok(msg) = self.port_rx.try_recv() {
            match msg {
                PortMsg::Add(id, entry) => {
                    if let Some(slot) = self.ports.entries.get_mut(id.0 as usize) {
                        *slot = Some(entry);
                    }
                }
                PortMsg::Release(id) => {
                    if let Some(entry) = self.ports.entries.get_mut(id.0 as usize).and_then(Option::take) {
                        // Unregistration happens control-side.
                        let _ = self.port_reclaim.try_send((id, entry));
                    }
                }
            }
        }
    }
}

impl jack::ProcessHandler for MixerProcess {
    fn process(&mut self, _: &jack::Client, ps: &jack::ProcessScope) -> jack::Control {
        self.drain_port_messages();

        let mut events = [MidiEvent {
            time: 0,
            len: 0,
            data: [0; 3],
        }; MAX_MIDI_EVENTS];
        let mut count = 0;
        for raw in self.midi_in.iter(ps) {
            if count == MAX_MIDI_EVENTS {
                break;
            }
            let len = raw.bytes.len();
            let mut data = [0u8; 3];
            let copied = len.min(3);
            data[..copied].copy_from_slice(&raw.bytes[..copied]);
            events[count] = MidiEvent {
                time: raw.time,
                len: len.min(u8::MAX as usize) as u8,
                data,
            };
            count += 1;
        }

        let writer = self.midi_out.writer(ps);
        let mut cycle = JackCycle {
            ps,
            ports: &mut self.ports,
            events: &events[..count],
            writer,
        };
        self.engine.run_cycle(&mut cycle);

        jack::Control::Continue
    }

    fn buffer_size(&mut self, _: &jack::Client, size: jack::Frames) -> jack::Control {
        self.engine.apply_buffer_size(size);
        jack::Control::Continue
    }
}

/// One JACK period presented through the core's process contract.
struct JackCycle<'a> {
    ps: &'a jack::ProcessScope,
    ports: &'a mut PortTable,
    events: &'a [MidiEvent],
    writer: jack::MidiWriter<'a>,
}

impl ProcessCycle for JackCycle<'_> {
    fn frames(&self) -> usize {
        self.ps.n_frames() as usize
    }

    fn capture(&self, port: PortId) -> &[Sample] {
        match self.ports.get(port) {
            Some(PortEntry::Capture(port)) => port.as_slice(self.ps),
            _ => &[],
        }
    }

    fn playback(&mut self, port: PortId, data: &[Sample]) {
        let ps = self.ps;
        if let Some(PortEntry::Playback(port)) = self.ports.get_mut(port) {
            let buffer = port.as_mut_slice(ps);
            let n = data.len().min(buffer.len());
            buffer[..n].copy_from_slice(&data[..n]);
        }
    }

    fn silence(&mut self, port: PortId) {
        let ps = self.ps;
        if let Some(PortEntry::Playback(port)) = self.ports.get_mut(port) {
            port.as_mut_slice(ps).fill(0.0);
        }
    }

    fn connected(&self, port: PortId) -> bool {
        let connected = match self.ports.get(port) {
            Some(PortEntry::Capture(port)) => port.connected_count(),
            Some(PortEntry::Playback(port)) => port.connected_count(),
            None => return false,
        };
        connected.map(|count| count > 0).unwrap_or(false)
    }

    fn midi_in(&self) -> &[MidiEvent] {
        self.events
    }

    fn midi_out(&mut self, data: [u8; 3]) -> bool {
        self.writer
            .write(&jack::RawMidi {
                time: 0,
                bytes: &data,
            })
            .is_ok()
    }
}
