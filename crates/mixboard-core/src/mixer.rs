//! Control-plane mixer API.
//!
//! [`Mixer`] owns the control half of the engine: the channel directory,
//! the CC registry master, and the host graph client. Channel handles are
//! cheap clones that talk to the engine through shared atomics and the
//! serialized command stream; none of the operations here ever run on the
//! audio thread, and the engine never takes the control mutex.

use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, warn};
use parking_lot::Mutex;

use crate::channel::{
    ChannelShared, MeterMode, MidiChangeObserver, MixerShared, StripRef, MAX_CHANNELS,
};
use crate::command::{
    Command, Reclaim, RoutingKind, COMMAND_QUEUE_CAPACITY, RECLAIM_QUEUE_CAPACITY,
};
use crate::config::MixerConfig;
use crate::engine::{Engine, OutputStrip, Strip};
use crate::error::{Error, Result};
use crate::fade::{db_to_value, value_to_db};
use crate::graph::{GraphBackend, GraphClient, PortDirection, PortId};
use crate::midi::{CcParam, MidiBehavior};
use crate::registry::CcRegistry;
use crate::scale::Scale;

/// One K-meter reading, both values in dBFS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KmeterDb {
    pub peak: f32,
    pub rms: f32,
}

struct ChannelRecord {
    name: String,
    stereo: bool,
    port_left: PortId,
    port_right: Option<PortId>,
    shared: Arc<ChannelShared>,
}

struct OutputRecord {
    base: ChannelRecord,
    system: bool,
    prefader: bool,
    /// Control-side mirrors of the engine's routing masks, for reads.
    soloed: u64,
    muted: u64,
    prefader_members: u64,
}

struct ControlState {
    // Dropped first: closing the host client stops the audio callback
    // before anything else is torn down.
    graph: Box<dyn GraphClient>,
    registry: CcRegistry,
    inputs: Vec<Option<ChannelRecord>>,
    outputs: Vec<Option<OutputRecord>>,
    commands: Sender<Command>,
    reclaim: Receiver<Reclaim>,
}

impl ControlState {
    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("engine command channel closed; mixer already shut down?");
        }
    }

    /// Tear down channels the engine has released: unregister their ports
    /// and drop their buffers, off the audio thread.
    fn drain_reclaim(&mut self) {
        while let Ok(item) = self.reclaim.try_recv() {
            match item {
                Reclaim::Input(strip) => self.release_ports(strip.port_left, strip.port_right),
                Reclaim::Output(output) => {
                    self.release_ports(output.base.port_left, output.base.port_right)
                }
                Reclaim::Observer(_) => {}
            }
        }
    }

    fn release_ports(&mut self, left: PortId, right: Option<PortId>) {
        self.graph.unregister_port(left);
        if let Some(right) = right {
            self.graph.unregister_port(right);
        }
    }

    fn name_taken(&self, name: &str, exempt: Option<StripRef>) -> bool {
        let input_hit = self.inputs.iter().enumerate().any(|(slot, record)| {
            exempt != Some(StripRef::Input(slot))
                && record.as_ref().is_some_and(|r| r.name == name)
        });
        let output_hit = self.outputs.iter().enumerate().any(|(slot, record)| {
            exempt != Some(StripRef::Output(slot))
                && record.as_ref().is_some_and(|r| r.base.name == name)
        });
        input_hit || output_hit
    }

    fn record(&self, target: StripRef) -> Option<&ChannelRecord> {
        match target {
            StripRef::Input(slot) => self.inputs.get(slot)?.as_ref(),
            StripRef::Output(slot) => self.outputs.get(slot)?.as_ref().map(|o| &o.base),
        }
    }

    fn record_mut(&mut self, target: StripRef) -> Option<&mut ChannelRecord> {
        match target {
            StripRef::Input(slot) => self.inputs.get_mut(slot)?.as_mut(),
            StripRef::Output(slot) => self.outputs.get_mut(slot)?.as_mut().map(|o| &mut o.base),
        }
    }

    fn register_audio_ports(
        &mut self,
        name: &str,
        stereo: bool,
        direction: PortDirection,
    ) -> Result<(PortId, Option<PortId>)> {
        if stereo {
            let left = self
                .graph
                .register_port(&format!("{name} L"), direction)
                .map_err(|_| Error::PortRegisterLeft)?;
            let right = match self.graph.register_port(&format!("{name} R"), direction) {
                Ok(port) => port,
                Err(_) => {
                    self.graph.unregister_port(left);
                    return Err(Error::PortRegisterRight);
                }
            };
            Ok((left, Some(right)))
        } else {
            let left = self
                .graph
                .register_port(name, direction)
                .map_err(|_| Error::PortRegister)?;
            Ok((left, None))
        }
    }

    fn bind_cc(&mut self, target: StripRef, param: CcParam, cc: u8) -> Result<()> {
        let mut updates = Vec::new();
        self.registry.bind(target, param, cc, &mut updates)?;
        for (cc, binding) in updates {
            self.send(Command::SetCcSlot { cc, binding });
        }
        Ok(())
    }

    fn auto_bind_cc(&mut self, target: StripRef, param: CcParam) -> Result<u8> {
        let mut updates = Vec::new();
        let cc = self.registry.auto_bind(target, param, &mut updates)?;
        for (cc, binding) in updates {
            self.send(Command::SetCcSlot { cc, binding });
        }
        Ok(cc)
    }

    fn remove_target(&mut self, target: StripRef) {
        let mut updates = Vec::new();
        self.registry.remove_strip(target, &mut updates);
        for (cc, binding) in updates {
            self.send(Command::SetCcSlot { cc, binding });
        }

        match target {
            StripRef::Input(slot) => {
                if self.inputs[slot].take().is_some() {
                    let bit = 1u64 << slot;
                    for output in self.outputs.iter_mut().flatten() {
                        output.soloed &= !bit;
                        output.muted &= !bit;
                        output.prefader_members &= !bit;
                    }
                    self.send(Command::RemoveInput(slot));
                }
            }
            StripRef::Output(slot) => {
                if self.outputs[slot].take().is_some() {
                    self.send(Command::RemoveOutput(slot));
                }
            }
        }
        self.drain_reclaim();
    }
}

fn free_slot<T>(slab: &[Option<T>]) -> Result<usize> {
    slab.iter()
        .position(Option::is_none)
        .ok_or(Error::ChannelAlloc)
}

/// A realtime mixer bound to one host graph client.
pub struct Mixer {
    ctl: Arc<Mutex<ControlState>>,
    shared: Arc<MixerShared>,
    client_name: String,
}

impl Mixer {
    /// Create a mixer and launch its engine on the given backend.
    pub fn new<B: GraphBackend>(config: MixerConfig, backend: B) -> Result<Self> {
        // `stereo_main` is accepted for compatibility and ignored.
        let _ = config.stereo_main;

        let shared = Arc::new(MixerShared::new(config.midi_behavior, config.kmetering));
        let (commands, command_rx) = bounded(COMMAND_QUEUE_CAPACITY);
        let (reclaim_tx, reclaim) = bounded(RECLAIM_QUEUE_CAPACITY);

        let engine = Engine::new(command_rx, reclaim_tx, Arc::clone(&shared));
        let graph = backend.launch(&config.client_name, engine)?;

        debug!("mixer \"{}\" created", config.client_name);
        Ok(Self {
            ctl: Arc::new(Mutex::new(ControlState {
                graph: Box::new(graph),
                registry: CcRegistry::new(),
                inputs: (0..MAX_CHANNELS).map(|_| None).collect(),
                outputs: (0..MAX_CHANNELS).map(|_| None).collect(),
                commands,
                reclaim,
            })),
            shared,
            client_name: config.client_name,
        })
    }

    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    /// Number of live input channels.
    pub fn channels_count(&self) -> usize {
        self.ctl.lock().inputs.iter().flatten().count()
    }

    pub fn kmetering(&self) -> bool {
        self.shared.kmetering()
    }

    pub fn set_kmetering(&self, on: bool) {
        self.shared.set_kmetering(on);
    }

    /// CC number of the most recently received control change, -1 if none.
    /// The UI's "learn" source.
    pub fn last_midi_cc(&self) -> i8 {
        self.shared.last_midi_cc()
    }

    pub fn set_last_midi_cc(&self, cc: i8) {
        self.shared.set_last_midi_cc(cc);
    }

    pub fn midi_behavior(&self) -> MidiBehavior {
        self.shared.midi_behavior()
    }

    pub fn set_midi_behavior(&self, behavior: MidiBehavior) {
        self.shared.set_midi_behavior(behavior);
    }

    /// Add a named input channel, registering its capture port(s).
    pub fn add_channel(&self, name: &str, stereo: bool) -> Result<ChannelHandle> {
        let mut ctl = self.ctl.lock();
        ctl.drain_reclaim();

        if name.is_empty() || ctl.name_taken(name, None) {
            return Err(Error::ChannelNameAlloc);
        }
        let slot = free_slot(&ctl.inputs)?;
        let (port_left, port_right) =
            ctl.register_audio_ports(name, stereo, PortDirection::Capture)?;

        let sample_rate = ctl.graph.sample_rate();
        let buffer_size = ctl.graph.buffer_size();
        let shared = Arc::new(ChannelShared::new(stereo));
        let strip = Box::new(Strip::new(
            slot,
            stereo,
            port_left,
            port_right,
            Arc::clone(&shared),
            sample_rate,
            buffer_size,
        ));
        ctl.send(Command::AddInput(strip));
        ctl.inputs[slot] = Some(ChannelRecord {
            name: name.into(),
            stereo,
            port_left,
            port_right,
            shared: Arc::clone(&shared),
        });

        debug!("input channel \"{name}\" added");
        Ok(ChannelHandle {
            target: StripRef::Input(slot),
            shared,
            ctl: Arc::clone(&self.ctl),
        })
    }

    /// Add a named output channel, registering its playback port(s).
    ///
    /// `system` outputs feed downstream devices: they are skipped while
    /// unconnected and global solo does not route to them.
    pub fn add_output_channel(
        &self,
        name: &str,
        stereo: bool,
        system: bool,
    ) -> Result<OutputChannelHandle> {
        let mut ctl = self.ctl.lock();
        ctl.drain_reclaim();

        if name.is_empty() || ctl.name_taken(name, None) {
            return Err(Error::ChannelNameAlloc);
        }
        let slot = free_slot(&ctl.outputs)?;
        let (port_left, port_right) =
            ctl.register_audio_ports(name, stereo, PortDirection::Playback)?;

        let sample_rate = ctl.graph.sample_rate();
        let buffer_size = ctl.graph.buffer_size();
        let shared = Arc::new(ChannelShared::new(stereo));
        let output = Box::new(OutputStrip::new(
            slot,
            stereo,
            port_left,
            port_right,
            Arc::clone(&shared),
            sample_rate,
            buffer_size,
            system,
        ));
        ctl.send(Command::AddOutput(output));
        ctl.outputs[slot] = Some(OutputRecord {
            base: ChannelRecord {
                name: name.into(),
                stereo,
                port_left,
                port_right,
                shared: Arc::clone(&shared),
            },
            system,
            prefader: false,
            soloed: 0,
            muted: 0,
            prefader_members: 0,
        });

        debug!("output channel \"{name}\" added");
        Ok(OutputChannelHandle {
            channel: ChannelHandle {
                target: StripRef::Output(slot),
                shared,
                ctl: Arc::clone(&self.ctl),
            },
        })
    }

    /// Remove every input channel.
    pub fn remove_all_channels(&self) {
        let mut ctl = self.ctl.lock();
        for slot in 0..MAX_CHANNELS {
            if ctl.inputs[slot].is_some() {
                ctl.remove_target(StripRef::Input(slot));
            }
        }
    }
}

impl Drop for Mixer {
    fn drop(&mut self) {
        self.ctl.lock().drain_reclaim();
    }
}

/// Handle to one mixer channel.
///
/// Clones are cheap and all refer to the same channel. After the channel
/// is removed, parameter reads keep returning the last values and
/// mutations become no-ops.
#[derive(Clone)]
pub struct ChannelHandle {
    target: StripRef,
    shared: Arc<ChannelShared>,
    ctl: Arc<Mutex<ControlState>>,
}

impl ChannelHandle {
    pub fn name(&self) -> String {
        self.ctl
            .lock()
            .record(self.target)
            .map(|r| r.name.clone())
            .unwrap_or_default()
    }

    /// Rename the channel and its host port(s).
    pub fn rename(&self, name: &str) -> Result<()> {
        let mut ctl = self.ctl.lock();
        if name.is_empty() || ctl.name_taken(name, Some(self.target)) {
            return Err(Error::ChannelNameAlloc);
        }
        let Some(record) = ctl.record(self.target) else {
            return Ok(());
        };
        let (port_left, port_right, stereo) = (record.port_left, record.port_right, record.stereo);

        if stereo {
            ctl.graph
                .rename_port(port_left, &format!("{name} L"))
                .map_err(|_| Error::JackRenamePortLeft)?;
            if let Some(right) = port_right {
                ctl.graph
                    .rename_port(right, &format!("{name} R"))
                    .map_err(|_| Error::JackRenamePortRight)?;
            }
        } else {
            ctl.graph
                .rename_port(port_left, name)
                .map_err(|_| Error::JackRenamePort)?;
        }

        if let Some(record) = ctl.record_mut(self.target) {
            record.name = name.into();
        }
        Ok(())
    }

    pub fn is_stereo(&self) -> bool {
        self.shared.is_stereo()
    }

    /// Committed volume target in dBFS.
    pub fn volume(&self) -> f32 {
        value_to_db(self.shared.volume())
    }

    /// Set the volume target in dBFS. The engine ramps to it over the
    /// transition window, sample-accurately even mid-ramp.
    pub fn set_volume(&self, db: f32) {
        self.shared.set_volume(db_to_value(db), false);
    }

    /// Committed balance target in `[-1, +1]`.
    pub fn balance(&self) -> f32 {
        self.shared.balance()
    }

    pub fn set_balance(&self, balance: f32) {
        self.shared.set_balance(balance.clamp(-1.0, 1.0), false);
    }

    pub fn is_muted(&self) -> bool {
        self.shared.is_muted()
    }

    pub fn mute(&self) {
        self.shared.set_mute(true);
    }

    pub fn unmute(&self) {
        self.shared.set_mute(false);
    }

    pub fn is_soloed(&self) -> bool {
        self.shared.is_soloed()
    }

    pub fn solo(&self) {
        self.shared.set_solo(true);
    }

    pub fn unsolo(&self) {
        self.shared.set_solo(false);
    }

    /// Install the scale used to translate volume CC values. Volume CCs
    /// are ignored until a scale is set.
    pub fn set_midi_scale(&self, scale: Scale) {
        self.shared.set_midi_scale(Some(Arc::new(scale)));
    }

    /// Peak meter reading `(left, right)` in dBFS; the right value is only
    /// meaningful for stereo channels.
    pub fn meter(&self, mode: MeterMode) -> (f32, f32) {
        let (left, right) = self.shared.meter.peaks(mode);
        (value_to_db(left), value_to_db(right))
    }

    /// K-meter reading `(left, right)` in dBFS. Reading consumes the RMS
    /// accumulation: it restarts at the next period.
    pub fn kmeter(&self, mode: MeterMode) -> (KmeterDb, KmeterDb) {
        let (left, right) = match mode {
            MeterMode::PreFader => (&self.shared.kmeter_pre_left, &self.shared.kmeter_pre_right),
            MeterMode::PostFader => (
                &self.shared.kmeter_post_left,
                &self.shared.kmeter_post_right,
            ),
        };
        let (lp, lr) = left.read();
        let (rp, rr) = right.read();
        (
            KmeterDb {
                peak: value_to_db(lp),
                rms: value_to_db(lr),
            },
            KmeterDb {
                peak: value_to_db(rp),
                rms: value_to_db(rr),
            },
        )
    }

    /// Request an RMS restart on all four K-meters.
    pub fn kmeter_reset(&self) {
        self.shared.kmeter_pre_left.reset();
        self.shared.kmeter_pre_right.reset();
        self.shared.kmeter_post_left.reset();
        self.shared.kmeter_post_right.reset();
    }

    /// Absolute peak since the last reset, in dBFS. NaN once a non-finite
    /// input sample has been seen.
    pub fn abspeak(&self, mode: MeterMode) -> f32 {
        if self.shared.nan_detected() {
            f32::NAN
        } else {
            value_to_db(self.shared.meter.abspeak(mode))
        }
    }

    pub fn abspeak_reset(&self, mode: MeterMode) {
        self.shared.meter.request_reset(mode);
    }

    /// One-shot read: whether MIDI touched this channel since the last call.
    pub fn midi_in_got_events(&self) -> bool {
        self.shared.take_midi_in_got_events()
    }

    pub fn volume_midi_cc(&self) -> Option<u8> {
        self.ctl.lock().registry.index_of(self.target, CcParam::Volume)
    }

    pub fn set_volume_midi_cc(&self, cc: u8) -> Result<()> {
        self.ctl.lock().bind_cc(self.target, CcParam::Volume, cc)
    }

    pub fn autoset_volume_midi_cc(&self) -> Result<u8> {
        self.ctl.lock().auto_bind_cc(self.target, CcParam::Volume)
    }

    pub fn balance_midi_cc(&self) -> Option<u8> {
        self.ctl
            .lock()
            .registry
            .index_of(self.target, CcParam::Balance)
    }

    pub fn set_balance_midi_cc(&self, cc: u8) -> Result<()> {
        self.ctl.lock().bind_cc(self.target, CcParam::Balance, cc)
    }

    pub fn autoset_balance_midi_cc(&self) -> Result<u8> {
        self.ctl.lock().auto_bind_cc(self.target, CcParam::Balance)
    }

    pub fn mute_midi_cc(&self) -> Option<u8> {
        self.ctl.lock().registry.index_of(self.target, CcParam::Mute)
    }

    pub fn set_mute_midi_cc(&self, cc: u8) -> Result<()> {
        self.ctl.lock().bind_cc(self.target, CcParam::Mute, cc)
    }

    pub fn autoset_mute_midi_cc(&self) -> Result<u8> {
        self.ctl.lock().auto_bind_cc(self.target, CcParam::Mute)
    }

    pub fn solo_midi_cc(&self) -> Option<u8> {
        self.ctl.lock().registry.index_of(self.target, CcParam::Solo)
    }

    pub fn set_solo_midi_cc(&self, cc: u8) -> Result<()> {
        self.ctl.lock().bind_cc(self.target, CcParam::Solo, cc)
    }

    pub fn autoset_solo_midi_cc(&self) -> Result<u8> {
        self.ctl.lock().auto_bind_cc(self.target, CcParam::Solo)
    }

    pub fn midi_cc_volume_picked_up(&self) -> bool {
        self.shared.volume_picked_up()
    }

    pub fn set_midi_cc_volume_picked_up(&self, status: bool) {
        self.shared.set_volume_picked_up(status);
    }

    pub fn midi_cc_balance_picked_up(&self) -> bool {
        self.shared.balance_picked_up()
    }

    pub fn set_midi_cc_balance_picked_up(&self, status: bool) {
        self.shared.set_balance_picked_up(status);
    }

    /// Install (or clear) the observer invoked from the audio thread when
    /// incoming MIDI changes this channel. See [`MidiChangeObserver`] for
    /// the non-blocking contract.
    pub fn set_midi_change_callback(&self, observer: Option<Box<dyn MidiChangeObserver>>) {
        self.ctl.lock().send(Command::SetObserver {
            strip: self.target,
            observer,
        });
    }

    /// Remove the channel: unbind its CCs, drop it from every routing set,
    /// and release its host ports.
    pub fn remove(self) {
        self.ctl.lock().remove_target(self.target);
    }
}

/// Handle to one output channel: the common channel surface plus the
/// per-output routing sets.
#[derive(Clone)]
pub struct OutputChannelHandle {
    channel: ChannelHandle,
}

impl OutputChannelHandle {
    /// The common channel surface (volume, balance, meters, CC bindings).
    pub fn channel(&self) -> &ChannelHandle {
        &self.channel
    }

    fn slot(&self) -> usize {
        match self.channel.target {
            StripRef::Output(slot) => slot,
            StripRef::Input(_) => unreachable!("output handle with input target"),
        }
    }

    fn input_slot(input: &ChannelHandle) -> Option<usize> {
        match input.target {
            StripRef::Input(slot) => Some(slot),
            StripRef::Output(_) => None,
        }
    }

    fn set_routing(&self, input: &ChannelHandle, kind: RoutingKind, on: bool) {
        let Some(input_slot) = Self::input_slot(input) else {
            return;
        };
        let slot = self.slot();
        let mut ctl = self.channel.ctl.lock();
        let Some(record) = ctl.outputs[slot].as_mut() else {
            return;
        };
        let bit = 1u64 << input_slot;
        let mask = match kind {
            RoutingKind::Solo => &mut record.soloed,
            RoutingKind::Mute => &mut record.muted,
            RoutingKind::Prefader => &mut record.prefader_members,
        };
        if on {
            *mask |= bit;
        } else {
            *mask &= !bit;
        }
        ctl.send(Command::SetRouting {
            output: slot,
            input: input_slot,
            kind,
            on,
        });
    }

    fn routing_contains(&self, input: &ChannelHandle, kind: RoutingKind) -> bool {
        let Some(input_slot) = Self::input_slot(input) else {
            return false;
        };
        let ctl = self.channel.ctl.lock();
        let Some(record) = ctl.outputs[self.slot()].as_ref() else {
            return false;
        };
        let mask = match kind {
            RoutingKind::Solo => record.soloed,
            RoutingKind::Mute => record.muted,
            RoutingKind::Prefader => record.prefader_members,
        };
        mask & (1u64 << input_slot) != 0
    }

    /// Solo an input on this output only.
    pub fn set_solo(&self, input: &ChannelHandle, on: bool) {
        self.set_routing(input, RoutingKind::Solo, on);
    }

    pub fn is_solo(&self, input: &ChannelHandle) -> bool {
        self.routing_contains(input, RoutingKind::Solo)
    }

    /// Mute an input on this output only.
    pub fn set_muted(&self, input: &ChannelHandle, on: bool) {
        self.set_routing(input, RoutingKind::Mute, on);
    }

    pub fn is_muted(&self, input: &ChannelHandle) -> bool {
        self.routing_contains(input, RoutingKind::Mute)
    }

    /// Route an input pre-fader into this output only.
    pub fn set_in_prefader(&self, input: &ChannelHandle, on: bool) {
        self.set_routing(input, RoutingKind::Prefader, on);
    }

    pub fn is_in_prefader(&self, input: &ChannelHandle) -> bool {
        self.routing_contains(input, RoutingKind::Prefader)
    }

    /// Tap pre-fader for every input and bypass the output fader stage.
    pub fn set_prefader(&self, on: bool) {
        let slot = self.slot();
        let mut ctl = self.channel.ctl.lock();
        if let Some(record) = ctl.outputs[slot].as_mut() {
            record.prefader = on;
        }
        ctl.send(Command::SetOutputPrefader { output: slot, on });
    }

    pub fn is_prefader(&self) -> bool {
        let ctl = self.channel.ctl.lock();
        ctl.outputs[self.slot()]
            .as_ref()
            .is_some_and(|record| record.prefader)
    }

    pub fn is_system(&self) -> bool {
        let ctl = self.channel.ctl.lock();
        ctl.outputs[self.slot()]
            .as_ref()
            .is_some_and(|record| record.system)
    }

    pub fn remove(self) {
        self.channel.remove();
    }
}
