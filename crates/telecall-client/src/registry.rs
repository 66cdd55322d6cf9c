//! Client mirror of the server's peer registry.
//!
//! Registration has no reply of its own: we know it worked when our
//! connection shows up in a roster broadcast. If that does not happen before
//! the deadline, registration is reported as timed out instead of waiting
//! forever.

use telecall_common::models::{ConnectionId, Roster, UserIdentity};
use telecall_common::signal::{RosterUpdate, UserRegistration};
use telecall_common::{CallError, CallResult, Signal};
use tracing::{debug, info, warn};

use crate::scheduler::{ScheduledTask, Scheduler, Tick, TimerKind};
use crate::state::{ClientEvent, ClientState, RegistrationStatus, TransportStatus};
use crate::transport::SignalingTransport;

pub struct Registration {
    state: ClientState,
    transport: SignalingTransport,
    scheduler: Scheduler,
    timeout_secs: u64,
    deadline: Option<ScheduledTask>,
}

impl Registration {
    pub fn new(
        state: ClientState,
        transport: SignalingTransport,
        scheduler: Scheduler,
        timeout_secs: u64,
    ) -> Self {
        Self {
            state,
            transport,
            scheduler,
            timeout_secs,
            deadline: None,
        }
    }

    /// Socket is up: new epoch, and register again if we know who we are.
    pub fn on_connected(&mut self) -> CallResult<()> {
        self.state.update_connection(|c| {
            c.transport = TransportStatus::Connected;
            c.epoch += 1;
            c.registration = RegistrationStatus::Unregistered;
        });
        info!(epoch = self.state.connection().epoch, "Signaling connected");

        match self.state.connection().identity {
            Some(identity) => self.register(identity),
            None => Ok(()),
        }
    }

    /// Announce `identity` and start waiting for our roster entry.
    /// While disconnected the identity is only stored; it goes out on connect.
    pub fn register(&mut self, identity: UserIdentity) -> CallResult<()> {
        let registration = UserRegistration::from(&identity);
        self.state.update_connection(|c| c.identity = Some(identity));
        if !self.transport.is_connected() {
            debug!("Registration deferred until connected");
            return Ok(());
        }
        self.transport.send(Signal::RegisterUser(registration))?;

        self.state
            .update_connection(|c| c.registration = RegistrationStatus::Pending);
        self.deadline = Some(self.scheduler.once(
            TimerKind::RegistrationDeadline,
            std::time::Duration::from_secs(self.timeout_secs),
        ));
        debug!(timeout_secs = self.timeout_secs, "Registration sent");
        Ok(())
    }

    pub fn on_connection_assigned(&mut self, id: ConnectionId) {
        debug!(connection = %id, "Connection id assigned");
        self.state.update_connection(|c| c.local_id = Some(id));
    }

    /// Replace the roster with the broadcast's snapshot. Returns `true` the
    /// first time this completes a pending registration.
    pub fn on_roster(&mut self, update: RosterUpdate) -> bool {
        let roster = Roster::from_snapshot(update.users);
        let conn = self.state.connection();

        let me = match &conn.local_id {
            Some(id) if roster.contains(id) => Some(id.clone()),
            Some(_) => None,
            // socket-id not seen yet: recognise ourselves by account
            None => conn
                .identity
                .as_ref()
                .and_then(|i| i.user_id.as_deref())
                .and_then(|uid| roster.find_user(uid))
                .map(|entry| entry.id.clone()),
        };
        self.state.replace_roster(roster);

        let Some(me) = me else { return false };
        if conn.registration != RegistrationStatus::Pending {
            return false;
        }

        self.deadline = None;
        self.state.update_connection(|c| {
            c.local_id = Some(me.clone());
            c.registration = RegistrationStatus::Registered;
        });
        info!(connection = %me, "Registered");
        self.state.emit(ClientEvent::Registered { connection_id: me });
        true
    }

    /// Returns `true` if the tick was ours and registration timed out.
    pub fn on_tick(&mut self, tick: &Tick) -> bool {
        if !self.deadline.as_ref().is_some_and(|t| t.owns(tick)) {
            return false;
        }
        self.deadline = None;
        if self.state.connection().registration != RegistrationStatus::Pending {
            return false;
        }

        let err = CallError::RegistrationTimedOut {
            after_secs: self.timeout_secs,
        };
        warn!(code = err.reason_code(), "{err}");
        self.state
            .update_connection(|c| c.registration = RegistrationStatus::TimedOut);
        self.state.emit(ClientEvent::RegistrationTimedOut(err));
        true
    }

    /// Socket lost: every address we knew is dead.
    pub fn on_disconnected(&mut self) {
        self.deadline = None;
        let roster_ids: Vec<ConnectionId> = self.state.snapshot().roster.ids().cloned().collect();
        self.state.update_connection(|c| {
            c.transport = TransportStatus::Disconnected;
            c.registration = RegistrationStatus::Unregistered;
            c.stale_ids.extend(roster_ids);
            if let Some(id) = c.local_id.take() {
                c.stale_ids.insert(id);
            }
        });
        self.state.replace_roster(Roster::default());
        debug!("Connection ids invalidated");
    }
}
