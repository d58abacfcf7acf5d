//! Control-plane side of the JACK binding.

use crossbeam_channel::{Receiver, Sender};
use log::debug;
use mixboard_core::{Error, GraphClient, PortDirection, PortId, Result};

use crate::process::{MixerProcess, PortEntry, PortMsg};
use crate::MAX_PORTS;

/// The active JACK client, seen from control threads.
///
/// Implements [`GraphClient`]: port registration and renaming happen here,
/// owned ports are shipped to the process side for buffer access, and
/// released ports come back for actual unregistration. Dropping the graph
/// deactivates the client, which stops the audio callback before the rest
/// of the mixer is torn down.
pub struct JackGraph {
    client: jack::AsyncClient<(), MixerProcess>,
    /// Unowned clones for rename and connection queries, indexed by id.
    unowned: Vec<Option<jack::Port<jack::Unowned>>>,
    free_ids: Vec<u32>,
    next_id: u32,
    port_tx: Sender<PortMsg>,
    port_reclaim: Receiver<(PortId, PortEntry)>,
}

impl JackGraph {
    pub(crate) fn new(
        client: jack::AsyncClient<(), MixerProcess>,
        port_tx: Sender<PortMsg>,
        port_reclaim: Receiver<(PortId, PortEntry)>,
    ) -> Self {
        Self {
            client,
            unowned: (0..MAX_PORTS).map(|_| None).collect(),
            free_ids: Vec::new(),
            next_id: 0,
            port_tx,
            port_reclaim,
        }
    }

    /// Unregister ports the process side has released.
    fn drain_reclaimed(&mut self) {
        while let Ok((id, entry)) = self.port_reclaim.try_recv() {
            let client = self.client.as_client();
            let result = match entry {
                PortEntry::Capture(port) => client.unregister_port(port),
                PortEntry::Playback(port) => client.unregister_port(port),
            };
            if result.is_err() {
                debug!("failed to unregister port {}", id.0);
            }
            self.free_ids.push(id.0);
        }
    }

    fn allocate_id(&mut self) -> Result<u32> {
        if let Some(id) = self.free_ids.pop() {
            return Ok(id);
        }
        if (self.next_id as usize) < MAX_PORTS {
            let id = self.next_id;
            self.next_id += 1;
            return Ok(id);
        }
        Err(Error::PortRegister)
    }
}

impl GraphClient for JackGraph {
    fn register_port(&mut self, name: &str, direction: PortDirection) -> Result<PortId> {
        self.drain_reclaimed();
        let id = self.allocate_id()?;
        let client = self.client.as_client();

        let (unowned, entry) = match direction {
            PortDirection::Capture => {
                let port = client
                    .register_port(name, jack::AudioIn::default())
                    .map_err(|_| Error::PortRegister)?;
                (port.clone_unowned(), PortEntry::Capture(port))
            }
            PortDirection::Playback => {
                let port = client
                    .register_port(name, jack::AudioOut::default())
                    .map_err(|_| Error::PortRegister)?;
                (port.clone_unowned(), PortEntry::Playback(port))
            }
        };

        self.unowned[id as usize] = Some(unowned);
        if self.port_tx.send(PortMsg::Add(PortId(id), entry)).is_err() {
            debug!("process side gone; port {name} will leak until close");
        }
        Ok(PortId(id))
    }

    fn unregister_port(&mut self, port: PortId) {
        if let Some(slot) = self.unowned.get_mut(port.0 as usize) {
            *slot = None;
        }
        let _ = self.port_tx.send(PortMsg::Release(port));
        // The owned port comes back through the reclaim channel within a
        // couple of cycles; unregistration completes on a later call.
        self.drain_reclaimed();
    }

    fn rename_port(&mut self, port: PortId, name: &str) -> Result<()> {
        let slot = self
            .unowned
            .get_mut(port.0 as usize)
            .and_then(|slot| slot.as_mut())
            .ok_or(Error::JackRenamePort)?;
        slot.set_name(name).map_err(|_| Error::JackRenamePort)
    }

    fn sample_rate(&self) -> u32 {
        self.client.as_client().sample_rate() as u32
    }

    fn buffer_size(&self) -> u32 {
        self.client.as_client().buffer_size()
    }
}
