// fabrictwin: Ethernet switch fabric digital twin
//! Process-scoped switch registry and the per-switch actor loop (§5, §9).
//!
//! Peer switches are referenced only by name; this registry is the sole place a name is
//! turned into something that can actually receive a frame. Each switch runs as its own
//! `tokio::task` owning a [`crate::switch::Switch`] exclusively -- cross-switch calls are
//! unbounded-channel sends into that task's inboxes, never a reentrant method call, so no
//! switch ever blocks waiting on another switch's lock.

use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use ipnet::Ipv4Net;
use tokio::sync::{mpsc, oneshot};

use crate::error::{RegistryError, SwitchError};
use crate::l3_interface::L3Interface;
use crate::packet::Packet;
use crate::switch::{PingReport, Switch, SwitchTiming};

/// A frame handed from one switch's `send` to a peer's `receive` inbox.
pub struct FrameEnvelope {
    /// The frame itself.
    pub packet: Packet,
    /// Remaining hop budget.
    pub ttl: u8,
    /// The receiving switch's own port id for this link.
    pub in_port_id: i32,
}

/// An LSA flooded from one switch to a neighbor's LSA inbox.
pub struct LsaEnvelope {
    /// Name of the router the LSA describes.
    pub from_node: String,
    /// That router's adjacency row.
    pub lsa: BTreeMap<String, u32>,
}

/// A unit of mutation dispatched into a switch's actor task. Built by [`SwitchHandle::configure`]
/// (or [`SwitchHandle::configure_detached`]); carries its own result channel internally, so the
/// actor loop can stay oblivious to what kind of call it's running.
type Command = Box<dyn FnOnce(&mut Switch) + Send + 'static>;

/// A cheap, read-mostly mirror of the handful of fields that §4.6's next-hop resolution and
/// §4.5's redistribution need to read from a *different* switch than the one currently
/// computing routes. Written by the owning switch on every configuration change; read by
/// anyone holding a [`SwitchHandle`]. This is the same "shared resource, write-rarely,
/// read-often" shape §5 mandates for the registry itself, just scoped to topology-relevant
/// fields instead of the whole switch.
#[derive(Debug, Clone, Default)]
pub struct SwitchSnapshot {
    pub(crate) l3_interfaces: Vec<L3Interface>,
    pub(crate) port_links: HashMap<i32, Option<String>>,
}

/// A cloneable reference to a running switch actor.
#[derive(Clone)]
pub struct SwitchHandle {
    name: String,
    pub(crate) frame_tx: mpsc::UnboundedSender<FrameEnvelope>,
    pub(crate) lsa_tx: mpsc::UnboundedSender<LsaEnvelope>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    snapshot: Arc<RwLock<SwitchSnapshot>>,
}

impl SwitchHandle {
    /// This switch's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// This switch's current L3 interfaces, as of the last configuration change.
    pub fn l3_interfaces(&self) -> Vec<L3Interface> {
        self.snapshot.read().expect("snapshot lock poisoned").l3_interfaces.clone()
    }

    /// Every network this switch is directly connected to.
    pub fn connected_subnets(&self) -> Vec<Ipv4Net> {
        self.l3_interfaces().iter().map(|i| i.network()).collect()
    }

    /// Whether `port_id` on this switch links back to `other`.
    pub fn port_links_back_to(&self, port_id: i32, other: &str) -> bool {
        self.snapshot
            .read()
            .expect("snapshot lock poisoned")
            .port_links
            .get(&port_id)
            .and_then(|peer| peer.as_deref())
            == Some(other)
    }

    /// Run `f` against this switch's state on its own actor task and await the result.
    pub async fn configure<F, R>(&self, f: F) -> Result<R, SwitchError>
    where
        F: FnOnce(&mut Switch) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Command = Box::new(move |switch: &mut Switch| {
            let _ = tx.send(f(switch));
        });
        self.cmd_tx.send(job).map_err(|_| SwitchError::ActorShutDown)?;
        rx.await.map_err(|_| SwitchError::ActorShutDown)
    }

    /// Fire-and-forget variant of [`SwitchHandle::configure`], used where the caller is
    /// itself running inside another switch's actor turn and cannot `.await` without
    /// risking a cross-actor deadlock (e.g. MVRP advertisement).
    pub fn configure_detached<F>(&self, f: F) -> Result<(), SwitchError>
    where
        F: FnOnce(&mut Switch) + Send + 'static,
    {
        self.cmd_tx.send(Box::new(f)).map_err(|_| SwitchError::ActorShutDown)
    }

    /// `ping(dst_ip, count, timeout)`, per §4.9. Each attempt registers a completion waiter
    /// and originates the echo request in a single actor turn, then awaits the waiter with a
    /// timeout instead of polling.
    pub async fn ping(&self, dst_ip: Ipv4Addr, count: u32, per_attempt_timeout: Duration) -> Result<PingReport, SwitchError> {
        use crate::switch::PingAttempt;

        let mut attempts = Vec::with_capacity(count as usize);
        for seq in 1..=count {
            let (tx, rx) = oneshot::channel();
            self.configure(move |sw| sw.originate_ping(dst_ip, seq, tx)).await?;
            let start = Instant::now();
            let outcome = tokio::time::timeout(per_attempt_timeout, rx).await;
            attempts.push(match outcome {
                Ok(Ok(())) => PingAttempt::Replied(start.elapsed()),
                _ => PingAttempt::TimedOut,
            });
        }
        Ok(PingReport { attempts })
    }
}

/// The process-wide, name-keyed table of running switches (§3 "weak lookups by name", §5
/// "shared resource").
#[derive(Clone)]
pub struct SwitchRegistry {
    inner: Arc<RwLock<HashMap<String, SwitchHandle>>>,
}

impl Default for SwitchRegistry {
    fn default() -> SwitchRegistry {
        SwitchRegistry::new()
    }
}

impl SwitchRegistry {
    /// Create an empty registry.
    pub fn new() -> SwitchRegistry {
        SwitchRegistry {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Look up a running switch by name.
    pub fn get(&self, name: &str) -> Option<SwitchHandle> {
        self.inner.read().expect("registry lock poisoned").get(name).cloned()
    }

    /// Names of every currently registered switch.
    pub fn names(&self) -> Vec<String> {
        self.inner.read().expect("registry lock poisoned").keys().cloned().collect()
    }

    /// `add node <name>`: create a switch, spawn its actor task, and register it.
    pub fn add_switch(
        &self,
        name: String,
        port_count: u16,
        reference_bw_mbps: u32,
        timing: SwitchTiming,
    ) -> Result<SwitchHandle, RegistryError> {
        self.add_switch_with_port_speed(name, port_count, reference_bw_mbps, crate::port::DEFAULT_SPEED_MBPS, timing)
    }

    /// Same as [`SwitchRegistry::add_switch`], but with an explicit default port speed
    /// (carried in from [`crate::config::FabricConfig::default_port_speed_mbps`]) instead
    /// of [`crate::port::DEFAULT_SPEED_MBPS`].
    pub fn add_switch_with_port_speed(
        &self,
        name: String,
        port_count: u16,
        reference_bw_mbps: u32,
        default_port_speed_mbps: u32,
        timing: SwitchTiming,
    ) -> Result<SwitchHandle, RegistryError> {
        if self.inner.read().expect("registry lock poisoned").contains_key(&name) {
            return Err(RegistryError::DuplicateSwitch(name));
        }

        let switch = Switch::new(name.clone(), port_count, reference_bw_mbps, default_port_speed_mbps, timing, self.clone());
        let snapshot = switch.snapshot_handle();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (lsa_tx, lsa_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let handle = SwitchHandle {
            name: name.clone(),
            frame_tx,
            lsa_tx,
            cmd_tx,
            snapshot,
        };

        self.inner.write().expect("registry lock poisoned").insert(name, handle.clone());
        tokio::spawn(run_switch_actor(switch, frame_rx, lsa_rx, cmd_rx));
        Ok(handle)
    }

    /// Remove a switch from the registry. Dropping the last handle closes its inboxes,
    /// which ends its actor task (§3 "destroyed on shutdown").
    pub fn remove_switch(&self, name: &str) -> Result<(), RegistryError> {
        self.inner
            .write()
            .expect("registry lock poisoned")
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| RegistryError::UnknownSwitch(name.to_string()))
    }

    /// `link <sw1> <p1> <sw2> <p2>`: bring both ends up and record the symmetric adjacency
    /// (§4.1, §8 symmetry invariant).
    ///
    /// Checks both ports are free before mutating either side, so a rejected link (e.g.
    /// `port_b` already linked) never leaves `port_a` linked with no reciprocal peer on
    /// `b` -- that would violate the symmetry invariant on the error path. The commit step
    /// still rolls `a` back if `b`'s commit somehow fails after the check (a concurrent
    /// `link` racing between this call's check and commit), so the invariant holds even
    /// under that race, not just on the common path.
    pub async fn link(&self, a: &str, port_a: i32, b: &str, port_b: i32) -> Result<(), RegistryError> {
        let handle_a = self.get(a).ok_or_else(|| RegistryError::UnknownSwitch(a.to_string()))?;
        let handle_b = self.get(b).ok_or_else(|| RegistryError::UnknownSwitch(b.to_string()))?;

        let already_linked_a = handle_a.configure(move |sw| sw.port_is_linked(port_a)).await??;
        if already_linked_a {
            return Err(RegistryError::Switch(SwitchError::PortAlreadyLinked(port_a)));
        }
        let already_linked_b = handle_b.configure(move |sw| sw.port_is_linked(port_b)).await??;
        if already_linked_b {
            return Err(RegistryError::Switch(SwitchError::PortAlreadyLinked(port_b)));
        }

        let b_name = b.to_string();
        handle_a.configure(move |sw| sw.set_linked(port_a, b_name, port_b)).await??;
        let a_name = a.to_string();
        match handle_b.configure(move |sw| sw.set_linked(port_b, a_name, port_a)).await? {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = handle_a.configure(move |sw| sw.set_unlinked(port_a)).await;
                Err(err.into())
            }
        }
    }

    /// Inverse of [`SwitchRegistry::link`].
    pub async fn unlink(&self, a: &str, port_a: i32, b: &str, port_b: i32) -> Result<(), RegistryError> {
        let handle_a = self.get(a).ok_or_else(|| RegistryError::UnknownSwitch(a.to_string()))?;
        let handle_b = self.get(b).ok_or_else(|| RegistryError::UnknownSwitch(b.to_string()))?;

        handle_a.configure(move |sw| sw.set_unlinked(port_a)).await??;
        handle_b.configure(move |sw| sw.set_unlinked(port_b)).await??;
        Ok(())
    }
}

/// How often the pending-ARP watchdog sweeps for stale queue entries (§5, §8 scenario 3).
const PENDING_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// The body of a switch's actor task: serialize every inbound frame, LSA, and
/// configuration command through one `tokio::select!` loop, plus a periodic sweep that
/// expires stale pending-ARP entries. Exits once every sender has been dropped (the switch
/// was removed from the registry).
async fn run_switch_actor(
    mut switch: Switch,
    mut frame_rx: mpsc::UnboundedReceiver<FrameEnvelope>,
    mut lsa_rx: mpsc::UnboundedReceiver<LsaEnvelope>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
) {
    let mut sweep = tokio::time::interval(PENDING_SWEEP_INTERVAL);
    loop {
        tokio::select! {
            frame = frame_rx.recv() => {
                match frame {
                    Some(FrameEnvelope { packet, ttl, in_port_id }) => {
                        switch.receive(packet, ttl, in_port_id);
                    }
                    None => break,
                }
            }
            lsa = lsa_rx.recv() => {
                match lsa {
                    Some(LsaEnvelope { from_node, lsa }) => {
                        switch.handle_lsa(from_node, lsa);
                    }
                    None => break,
                }
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(job) => job(&mut switch),
                    None => break,
                }
            }
            _ = sweep.tick() => {
                switch.expire_pending(Instant::now());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn link_rejects_when_either_port_already_linked() {
        let registry = SwitchRegistry::new();
        registry.add_switch("sw1".to_string(), 4, 100_000, SwitchTiming::default()).unwrap();
        registry.add_switch("sw2".to_string(), 4, 100_000, SwitchTiming::default()).unwrap();
        registry.add_switch("sw3".to_string(), 4, 100_000, SwitchTiming::default()).unwrap();

        registry.link("sw2", 1, "sw3", 1).await.unwrap();

        // sw3's port 1 is already linked to sw2; this must fail without leaving sw1's
        // port 1 linked to a sw3 that never reciprocates (§8 symmetry invariant).
        let err = registry.link("sw1", 1, "sw3", 1).await.unwrap_err();
        assert!(matches!(err, RegistryError::Switch(SwitchError::PortAlreadyLinked(1))));

        let sw1 = registry.get("sw1").unwrap();
        let sw1_port1_linked = sw1.configure(|sw| sw.port_is_linked(1)).await.unwrap().unwrap();
        assert!(!sw1_port1_linked, "the rejected side of a failed link must not end up linked");
    }

    #[tokio::test]
    async fn link_is_symmetric_on_success() {
        let registry = SwitchRegistry::new();
        registry.add_switch("sw1".to_string(), 4, 100_000, SwitchTiming::default()).unwrap();
        registry.add_switch("sw2".to_string(), 4, 100_000, SwitchTiming::default()).unwrap();
        registry.link("sw1", 1, "sw2", 2).await.unwrap();

        let sw1 = registry.get("sw1").unwrap();
        let sw2 = registry.get("sw2").unwrap();
        let sw1_linked = sw1.configure(|sw| sw.port_is_linked(1)).await.unwrap().unwrap();
        let sw2_linked = sw2.configure(|sw| sw.port_is_linked(2)).await.unwrap().unwrap();
        assert!(sw1_linked && sw2_linked);
    }
}
