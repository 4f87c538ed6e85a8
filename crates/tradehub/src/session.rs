//! One trade, start to finish, on one console.
//!
//! A [`WorkerSession`] belongs to a single worker and outlives the trades it
//! runs: it caches the console's offsets, remembers the last item a partner
//! offered (partners often leave their previous offer on screen) and holds
//! the worker's barrier seat.
//!
//! ```text
//! Initializing -> AwaitingConnection -> EnteringMeetingPoint -> RequestingExchange
//!      -> SearchingForPartner -> PartnerFound -> ExchangeOffered -> Confirming
//!      -> Finished | Canceled(result)
//! ```
//!
//! Connection faults abort the session with `Err` and are handled by the
//! worker. Everything else ends in a [`TradeResult`], after the session has
//! backed out of whatever menus it was in. A fault while backing out of a
//! trade that already completed does not undo it: the session reports
//! `Success` and holds the fault for [`WorkerSession::take_link_fault`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::barrier::{BarrierSeat, SynchronizationBarrier};
use crate::config::{HubConfig, TradeAbuseAction};
use crate::counts::TradeCounts;
use crate::distribution::DistributionPool;
use crate::error::DeviceError;
use crate::keypad;
use crate::outcome::TradeResult;
use crate::traits::{
    AbuseRegistry, Button, ConsoleAdapter, LegalityOracle, Notice, OffsetTable, PartnerStanding,
    RemoteConnection,
};
use crate::types::{ItemInfo, Payload, TradeEntry, TradeKind};

/// Where a session currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Initializing,
    AwaitingConnection,
    EnteringMeetingPoint,
    RequestingExchange,
    SearchingForPartner,
    PartnerFound,
    ExchangeOffered,
    Confirming,
    Finished,
    Canceled(TradeResult),
}

impl SessionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Finished | SessionPhase::Canceled(_))
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPhase::Canceled(result) => write!(f, "Canceled({result:?})"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Hub-wide collaborators every session talks to.
#[derive(Clone)]
pub struct SessionServices {
    pub config: Arc<HubConfig>,
    pub oracle: Arc<dyn LegalityOracle>,
    pub abuse: Arc<dyn AbuseRegistry>,
    pub counts: Arc<TradeCounts>,
    pub barrier: Arc<SynchronizationBarrier>,
    /// Looked up when a distribution partner asks for a specific item.
    pub pool: Arc<DistributionPool>,
}

/// What a swap request on a distribution trade came to.
enum Swap {
    /// Not a swap request; send the pool item already in the box.
    Keep,
    Injected(ItemInfo),
    NoMatch,
}

pub struct WorkerSession {
    name: String,
    conn: Arc<dyn RemoteConnection>,
    console: Arc<dyn ConsoleAdapter>,
    services: SessionServices,
    offsets: OffsetTable,
    offer_slot: Option<u64>,
    last_offered: [u8; 8],
    seat: BarrierSeat,
    phase: SessionPhase,
    link_fault: Option<DeviceError>,
}

impl WorkerSession {
    pub fn new(
        name: impl Into<String>,
        conn: Arc<dyn RemoteConnection>,
        console: Arc<dyn ConsoleAdapter>,
        services: SessionServices,
    ) -> Self {
        let timeout = Duration::try_from_secs_f64(services.config.distribution.synchronize_timeout_secs)
            .unwrap_or(Duration::from_secs(90));
        let seat = BarrierSeat::new(services.barrier.clone(), timeout);
        Self {
            name: name.into(),
            conn,
            console,
            services,
            offsets: OffsetTable::default(),
            offer_slot: None,
            last_offered: [0; 8],
            seat,
            phase: SessionPhase::Initializing,
            link_fault: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn offsets(&self) -> &OffsetTable {
        &self.offsets
    }

    /// Resolve offsets and make sure the console starts outside the meeting
    /// point, restarting the title if it cannot get out.
    pub async fn prepare(&mut self) -> Result<(), DeviceError> {
        info!(worker = %self.name, title = self.console.title(), "caching session offsets");
        self.offsets = self.console.resolve_offsets(self.conn.as_ref()).await?;
        if !self.ensure_outside().await? {
            self.restart().await?;
        }
        Ok(())
    }

    /// Connection fault raised after the last trade had already completed.
    pub fn take_link_fault(&mut self) -> Option<DeviceError> {
        self.link_fault.take()
    }

    /// Leave the synchronization barrier, e.g. on worker stop.
    pub fn leave_barrier(&mut self) {
        self.seat.update(false, &self.name);
    }

    /// Run one trade. `Err` only for connection faults; the caller owns the
    /// retry and reconnect decisions.
    pub async fn run(&mut self, entry: &TradeEntry, cancel: &CancellationToken) -> Result<TradeResult, DeviceError> {
        self.phase = SessionPhase::Initializing;
        self.link_fault = None;
        let result = match self.execute(entry, cancel).await {
            Ok(result) => result,
            Err(err) if err.is_connection() => return Err(err),
            Err(err) => {
                warn!(worker = %self.name, entry_id = %entry.id, error = %err, "session failed");
                TradeResult::ExceptionInternal
            }
        };
        let result = match self.cleanup(entry, result).await {
            Ok(result) => result,
            Err(err) if result.is_success() => {
                warn!(worker = %self.name, entry_id = %entry.id, error = %err, "link lost after a completed trade");
                self.link_fault = Some(err);
                result
            }
            Err(err) => return Err(err),
        };
        self.phase = if result.is_success() {
            SessionPhase::Finished
        } else {
            SessionPhase::Canceled(result)
        };
        debug!(worker = %self.name, entry_id = %entry.id, phase = %self.phase, "session ended");
        Ok(result)
    }

    fn enter(&mut self, phase: SessionPhase) {
        debug!(worker = %self.name, from = %self.phase, to = %phase, "phase");
        self.phase = phase;
    }

    fn remain_in_meeting_point(&self, entry: &TradeEntry) -> bool {
        entry.kind == TradeKind::Random && self.services.config.distribution.remain_in_meeting_point
    }

    async fn execute(&mut self, entry: &TradeEntry, cancel: &CancellationToken) -> Result<TradeResult, DeviceError> {
        let config = self.services.config.clone();
        let timings = &config.timings;

        self.seat.update(entry.is_synchronized, &self.name);
        entry.notifier.on_initialize(entry);
        info!(
            worker = %self.name,
            entry_id = %entry.id,
            kind = ?entry.kind,
            requester = %entry.requester_id,
            retry = entry.is_retry,
            "starting trade"
        );

        // A meeting point left over from an earlier trade would skip the
        // code entry for this one.
        if !self.remain_in_meeting_point(entry) && !self.ensure_outside().await? {
            warn!(worker = %self.name, "stuck in a previous meeting point, restarting");
            self.restart().await?;
        }

        if self.flag(self.offsets.soft_ban).await? {
            info!(worker = %self.name, "clearing connection penalty");
            self.console.clear_soft_ban(self.conn.as_ref(), &self.offsets).await?;
        }

        let mut sent = None;
        if let Some(payload) = entry.primary() {
            sent = Some(self.write_box(payload).await?);
        }

        if cancel.is_cancelled() {
            return Ok(TradeResult::RoutineCancel);
        }
        if !self.enter_meeting_point(entry, cancel).await? {
            warn!(worker = %self.name, "could not enter the meeting point, restarting");
            self.restart().await?;
            return Ok(TradeResult::RecoverEnterMeetingPoint);
        }

        self.enter(SessionPhase::RequestingExchange);
        self.console.request_exchange(self.conn.as_ref()).await?;

        self.enter(SessionPhase::SearchingForPartner);
        entry
            .notifier
            .on_searching(entry, &format!("Waiting for a trade partner. Link code: {}", entry.code.grouped()));
        if let Some(result) = self.await_partner(cancel).await? {
            return Ok(result);
        }

        self.enter(SessionPhase::PartnerFound);
        let partner = self.console.read_partner(self.conn.as_ref()).await?;
        let identity = partner.identity();
        info!(
            target: "tradehub::audit",
            partner = %identity,
            partner_name = %partner.name,
            requester = %entry.requester_id,
            entry_id = %entry.id,
            "trade started"
        );
        info!(worker = %self.name, partner = %partner.name, tid = partner.display_tid, "found trade partner");

        match self.services.abuse.check_partner(identity, &entry.requester_id) {
            PartnerStanding::Clean => {}
            PartnerStanding::MultipleAccounts
                if config.abuse.multi_account_action == TradeAbuseAction::Ignore =>
            {
                warn!(worker = %self.name, partner = %identity, "partner seen under another account");
            }
            standing => {
                warn!(worker = %self.name, partner = %identity, ?standing, "refusing trade partner");
                return Ok(TradeResult::SuspiciousActivity);
            }
        }

        sleep(Duration::from_millis(2_000 + timings.extra_time_open_box_ms)).await;
        entry.notifier.on_notify(
            entry,
            Notice::Text(format!(
                "Found link trade partner: {} TID: {} SID: {}. Waiting for an offer...",
                partner.name, partner.display_tid, partner.display_sid
            )),
        );
        let offer_slot = self.console.resolve_offer_slot(self.conn.as_ref()).await?;
        self.offer_slot = Some(offer_slot);

        if entry.kind == TradeKind::Dump {
            return self.dump_offers(entry, offer_slot, cancel).await;
        }

        let total = entry.payloads.len();
        let mut received = Vec::with_capacity(total);
        for (index, payload) in entry.payloads.iter().enumerate() {
            if index > 0 {
                info!(worker = %self.name, item = index + 1, total, "next batch item");
                sent = Some(self.write_box(payload).await?);
            }
            let result = self.trade_one(entry, offer_slot, sent.as_ref(), cancel).await?;
            match result {
                Ok(item) => {
                    if total > 1 {
                        entry.notifier.on_notify(
                            entry,
                            Notice::Item {
                                payload: item.clone(),
                                message: format!("Batch item {} of {} traded.", index + 1, total),
                            },
                        );
                    }
                    received.push(item);
                }
                Err(failure) => {
                    if !received.is_empty() {
                        entry.notifier.on_notify(
                            entry,
                            Notice::Text(format!(
                                "Batch trade stopped after {} of {} items: {}.",
                                received.len(),
                                total,
                                failure
                            )),
                        );
                    }
                    return Ok(failure);
                }
            }
        }

        let last = received.pop().unwrap_or_default();
        info!(worker = %self.name, entry_id = %entry.id, "partner completed the trade");
        entry.notifier.on_finished(entry, &last);
        self.services.counts.record(entry.kind);
        self.services.abuse.record_trade(identity, &entry.requester_id);
        Ok(TradeResult::Success)
    }

    /// Type the link code and join the meeting point. `false` when the
    /// console never shows up there.
    async fn enter_meeting_point(&mut self, entry: &TradeEntry, cancel: &CancellationToken) -> Result<bool, DeviceError> {
        if self.flag(self.offsets.in_meeting_point).await? {
            return Ok(true);
        }
        let timings = self.services.config.timings.clone();

        self.enter(SessionPhase::AwaitingConnection);
        self.console.open_code_entry(self.conn.as_ref(), entry.kind).await?;
        sleep(Duration::from_millis(timings.extra_time_open_code_entry_ms)).await;
        info!(worker = %self.name, code = %entry.code.grouped(), "entering link code");
        for button in keypad::presses(entry.code) {
            self.click(button, timings.keypress_ms).await?;
        }

        // All synchronized workers confirm together.
        self.seat.wait(&self.name, cancel).await;
        self.console.confirm_code(self.conn.as_ref()).await?;

        self.enter(SessionPhase::EnteringMeetingPoint);
        let mut tries = timings.join_meeting_tries;
        while !self.flag(self.offsets.in_meeting_point).await? {
            self.click(Button::A, 300).await?;
            tries = tries.saturating_sub(1);
            if tries == 0 {
                return Ok(false);
            }
        }
        sleep(Duration::from_millis(1_300 + timings.extra_time_join_meeting_ms)).await;
        Ok(true)
    }

    /// Wait for a partner to talk to us and open the exchange, within one
    /// shared budget of `trade_wait_time` polls.
    async fn await_partner(&mut self, cancel: &CancellationToken) -> Result<Option<TradeResult>, DeviceError> {
        let mut budget = self.services.config.trade.trade_wait_time;

        while !self.flag(self.offsets.partner_talking).await? {
            if cancel.is_cancelled() {
                return Ok(Some(TradeResult::RoutineCancel));
            }
            self.click(Button::A, 450).await?;
            self.click(Button::A, 450).await?;
            budget = budget.saturating_sub(1);
            if budget == 0 {
                return Ok(Some(TradeResult::NoTrainerFound));
            }
        }
        debug!(worker = %self.name, "partner is talking to us");

        while !self.flag(self.offsets.partner_loaded).await? {
            if cancel.is_cancelled() {
                return Ok(Some(TradeResult::RoutineCancel));
            }
            self.click(Button::A, 450).await?;
            self.click(Button::A, 450).await?;
            if !self.flag(self.offsets.partner_talking).await? {
                break;
            }
            budget = budget.saturating_sub(1);
            if budget == 0 {
                return Ok(Some(TradeResult::TrainerTooSlow));
            }
        }

        // Still going through dialogue and the box opening.
        sleep(Duration::from_millis(3_000)).await;
        if !self.flag(self.offsets.partner_loaded).await? {
            return Ok(Some(TradeResult::TrainerTooSlow));
        }
        Ok(None)
    }

    /// Offer, guard and confirm a single item. The inner `Err` is a terminal
    /// result for the whole session.
    async fn trade_one(
        &mut self,
        entry: &TradeEntry,
        offer_slot: u64,
        sent: Option<&ItemInfo>,
        cancel: &CancellationToken,
    ) -> Result<Result<Payload, TradeResult>, DeviceError> {
        self.enter(SessionPhase::ExchangeOffered);
        let Some(offered) = self.await_offer(offer_slot, cancel).await? else {
            if cancel.is_cancelled() {
                return Ok(Err(TradeResult::RoutineCancel));
            }
            return Ok(Err(TradeResult::TrainerTooSlow));
        };

        let mut sent = sent.copied();
        if entry.kind == TradeKind::Random {
            match self.swap_request(entry, &offered).await? {
                Swap::Keep => {}
                Swap::Injected(info) => sent = Some(info),
                Swap::NoMatch => return Ok(Err(TradeResult::TrainerRequestBad)),
            }
        }

        if self.services.config.trade.disallow_trade_evolve {
            if let Some(sending) = sent.as_ref() {
                if self.services.oracle.will_trade_evolve(&offered, sending) {
                    info!(worker = %self.name, entry_id = %entry.id, "offered item would evolve on trade");
                    return Ok(Err(TradeResult::TradeEvolveNotAllowed));
                }
            }
        }

        self.enter(SessionPhase::Confirming);
        let confirmed = self.confirm(cancel).await?;
        if !confirmed.is_success() {
            return Ok(Err(confirmed));
        }
        if cancel.is_cancelled() {
            return Ok(Err(TradeResult::RoutineCancel));
        }

        let bytes = self
            .conn
            .peek(self.offsets.box_start, self.console.slot_size())
            .await?;
        let received = self.console.describe(&bytes);
        // Our item is still in the slot: the exchange never happened.
        if sent.is_some_and(|sent| sent.same_contents(&received)) {
            info!(worker = %self.name, entry_id = %entry.id, "partner did not complete the trade");
            return Ok(Err(TradeResult::TrainerTooSlow));
        }
        Ok(Ok(Payload::new(bytes)))
    }

    /// A distribution partner offering the configured swap item gets the
    /// pool item named by its held-item field instead of the next one.
    async fn swap_request(&self, entry: &TradeEntry, offered: &ItemInfo) -> Result<Swap, DeviceError> {
        let settings = &self.services.config.distribution;
        if settings.swap_item == 0 {
            return Ok(Swap::Keep);
        }
        let wanted = offered.held_item;
        let found = if offered.item_id == settings.swap_item && wanted != 0 {
            let console = &self.console;
            self.services
                .pool
                .find(|item| console.describe(item.as_bytes()).item_id == wanted)
        } else {
            None
        };

        let Some(payload) = found else {
            if settings.swap_quit_if_no_match {
                info!(worker = %self.name, offered = offered.item_id, wanted, "no pool item for swap request");
                entry.notifier.on_notify(
                    entry,
                    Notice::Text(format!(
                        "No match found for the offered item {} (holding {}).",
                        offered.item_id, wanted
                    )),
                );
                return Ok(Swap::NoMatch);
            }
            return Ok(Swap::Keep);
        };

        info!(worker = %self.name, wanted, "injecting requested pool item");
        entry
            .notifier
            .on_notify(entry, Notice::Text("Injecting the requested item.".to_string()));
        let injected = self.write_box(&payload).await?;
        sleep(Duration::from_millis(2_500)).await;
        Ok(Swap::Injected(injected))
    }

    /// Wait for the partner to offer something new. `None` on timeout,
    /// cancellation, or an empty or corrupt offer.
    async fn await_offer(&mut self, slot: u64, cancel: &CancellationToken) -> Result<Option<ItemInfo>, DeviceError> {
        let timings = &self.services.config.timings;
        let (timeout, poll) = (timings.offer_timeout_ms, timings.offer_poll_ms);
        if !self.poll_until_changed(slot, timeout, poll, cancel).await? {
            return Ok(None);
        }
        let bytes = self.conn.peek(slot, self.console.slot_size()).await?;
        let offered = self.console.describe(&bytes);
        if offered.is_empty() || !offered.checksum_valid {
            return Ok(None);
        }
        self.last_offered = head(&bytes);
        Ok(Some(offered))
    }

    /// Poll the first eight bytes at `offset` until they differ from
    /// `last_offered`.
    async fn poll_until_changed(
        &self,
        offset: u64,
        timeout_ms: u64,
        poll_ms: u64,
        cancel: &CancellationToken,
    ) -> Result<bool, DeviceError> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let poll = Duration::from_millis(poll_ms.max(1));
        loop {
            let current = self.conn.peek(offset, 8).await?;
            if head(&current) != self.last_offered {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::select! {
                _ = cancel.cancelled() => return Ok(false),
                _ = sleep(poll) => {}
            }
        }
    }

    /// Keep pressing confirm until the box slot changes, meaning the
    /// exchange animation started.
    async fn confirm(&mut self, cancel: &CancellationToken) -> Result<TradeResult, DeviceError> {
        let trade = self.services.config.trade.clone();
        let animation = Duration::from_millis(self.services.config.timings.trade_animation_ms);

        let before = self.conn.peek(self.offsets.box_start, 8).await?;
        self.click(Button::A, 3_000).await?;
        for _ in 0..trade.max_trade_confirm_time {
            if cancel.is_cancelled() {
                return Ok(TradeResult::RoutineCancel);
            }
            if !self.flag(self.offsets.partner_talking).await? {
                return Ok(TradeResult::TrainerTooSlow);
            }
            self.click(Button::A, 1_000).await?;

            let now = self.conn.peek(self.offsets.box_start, 8).await?;
            if now != before {
                sleep(animation).await;
                return Ok(TradeResult::Success);
            }
        }
        Ok(TradeResult::TrainerTooSlow)
    }

    /// Collect whatever the partner shows us, up to the configured count and
    /// time, and report each item with its legality verdict.
    async fn dump_offers(&mut self, entry: &TradeEntry, slot: u64, cancel: &CancellationToken) -> Result<TradeResult, DeviceError> {
        let trade = self.services.config.trade.clone();
        let limit = Duration::from_secs(trade.max_dump_trade_time_secs);
        let start = Instant::now();
        let mut dumped = 0u32;
        let mut presses = 0u32;

        while dumped < trade.max_dumps_per_trade && start.elapsed() < limit {
            if cancel.is_cancelled() || !self.flag(self.offsets.partner_talking).await? {
                break;
            }
            if presses % 3 == 0 {
                self.click(Button::B, 100).await?;
            }
            presses += 1;

            if !self.poll_until_changed(slot, 3_000, 1_000, cancel).await? {
                continue;
            }
            let bytes = self.conn.peek(slot, self.console.slot_size()).await?;
            let shown = self.console.describe(&bytes);
            let fingerprint = head(&bytes);
            if shown.is_empty() || !shown.checksum_valid || fingerprint == self.last_offered {
                continue;
            }
            self.last_offered = fingerprint;

            let payload = Payload::new(bytes);
            let verdict = self.services.oracle.validate(&payload);
            dumped += 1;
            info!(worker = %self.name, dumped, legal = verdict.valid, "dumped offered item");
            let message = if trade.dump_trade_legality_check {
                let label = if verdict.valid { "legal" } else { "illegal" };
                format!("Shown item is {label}. {}", verdict.diagnostics)
            } else {
                format!("File {dumped}")
            };
            entry.notifier.on_notify(entry, Notice::Item { payload, message });
        }

        info!(worker = %self.name, dumped, "dump loop ended");
        if cancel.is_cancelled() && dumped == 0 {
            return Ok(TradeResult::RoutineCancel);
        }
        if dumped == 0 {
            return Ok(TradeResult::TrainerTooSlow);
        }
        self.services.counts.record(TradeKind::Dump);
        entry
            .notifier
            .on_notify(entry, Notice::Text(format!("Dumped {dumped} items.")));
        let blank = entry.primary().cloned().unwrap_or_default();
        entry.notifier.on_finished(entry, &blank);
        Ok(TradeResult::Success)
    }

    /// Back out of menus and, unless parked for distribution, out of the
    /// meeting point. A stuck console turns a failed trade into a recovery
    /// result.
    async fn cleanup(&mut self, entry: &TradeEntry, result: TradeResult) -> Result<TradeResult, DeviceError> {
        let outcome = self.back_out(entry).await;
        let backed_out = match outcome {
            Ok(ok) => ok,
            Err(err) if err.is_connection() => return Err(err),
            Err(err) => {
                warn!(worker = %self.name, error = %err, "backing out failed");
                false
            }
        };

        if let Some(slot) = self.offer_slot {
            // Partners often offer again after we leave; remember what is showing.
            if let Ok(bytes) = self.conn.peek(slot, 8).await {
                self.last_offered = head(&bytes);
            }
        }

        if backed_out || result.is_success() {
            if !backed_out {
                warn!(worker = %self.name, "console stuck after a completed trade");
            }
            return Ok(result);
        }
        match result {
            TradeResult::RecoverEnterMeetingPoint => Ok(result),
            _ => Ok(TradeResult::RecoverReturnToMeetingPoint),
        }
    }

    async fn back_out(&mut self, entry: &TradeEntry) -> Result<bool, DeviceError> {
        if !self.console.exit_to_meeting_point(self.conn.as_ref(), &self.offsets).await? {
            return Ok(false);
        }
        if self.remain_in_meeting_point(entry) {
            return Ok(true);
        }
        self.ensure_outside().await
    }

    async fn ensure_outside(&self) -> Result<bool, DeviceError> {
        if !self.flag(self.offsets.in_meeting_point).await? {
            return Ok(true);
        }
        if !self.console.exit_to_meeting_point(self.conn.as_ref(), &self.offsets).await? {
            return Ok(false);
        }
        self.console.leave_meeting_point(self.conn.as_ref(), &self.offsets).await
    }

    async fn restart(&mut self) -> Result<(), DeviceError> {
        self.console.restart_title(self.conn.as_ref()).await?;
        self.offsets = self.console.resolve_offsets(self.conn.as_ref()).await?;
        self.offer_slot = None;
        Ok(())
    }

    async fn write_box(&self, payload: &Payload) -> Result<ItemInfo, DeviceError> {
        let bytes = self.console.encode_for_slot(payload);
        self.conn.poke(self.offsets.box_start, &bytes).await?;
        Ok(self.console.describe(&bytes))
    }

    async fn flag(&self, offset: u64) -> Result<bool, DeviceError> {
        let bytes = self.conn.peek(offset, 1).await?;
        Ok(bytes.first().is_some_and(|b| *b != 0))
    }

    async fn click(&self, button: Button, delay_ms: u64) -> Result<(), DeviceError> {
        self.conn.press(button).await?;
        if delay_ms > 0 {
            sleep(Duration::from_millis(delay_ms)).await;
        }
        Ok(())
    }
}

fn head(bytes: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    let n = bytes.len().min(8);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}
