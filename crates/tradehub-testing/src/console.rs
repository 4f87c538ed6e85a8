//! In-memory console that behaves just enough like the real thing for a
//! session to run against it.

use std::collections::{HashMap, VecDeque};
use std::io;

use async_trait::async_trait;
use parking_lot::Mutex;
use tradehub::{
    Button, ConsoleAdapter, DeviceError, ItemInfo, OffsetTable, PartnerInfo, Payload,
    RemoteConnection, Stick, TradeKind,
};

/// Bytes per stored item.
pub const SLOT_SIZE: usize = 16;

const BOX_START: u64 = 0x1000;
const IN_MEETING: u64 = 0x2000;
const TALKING: u64 = 0x2100;
const LOADED: u64 = 0x2200;
const SOFT_BAN: u64 = 0x2300;
const OFFER: u64 = 0x3000;

/// Slot offsets of the seal byte and the checksummed data.
const SEAL: u64 = 7;
pub(crate) const DATA: usize = 8;

/// How the next partner to answer an exchange request behaves.
#[derive(Debug, Clone)]
pub enum PartnerScript {
    /// Nobody answers.
    NoShow,
    /// Someone talks to us but never finishes loading.
    Stalls,
    /// Offers `offers` one after another and completes the first `completes`.
    Trades {
        info: PartnerInfo,
        offers: Vec<Payload>,
        completes: usize,
    },
    /// Confirms, then backs out mid-animation: our own item comes back
    /// re-sealed instead of the offer.
    BacksOut { info: PartnerInfo, offer: Payload },
}

impl PartnerScript {
    /// A partner that completes every offer.
    pub fn trades(info: PartnerInfo, offers: Vec<Payload>) -> Self {
        let completes = offers.len();
        PartnerScript::Trades { info, offers, completes }
    }

    /// A partner that shows its offers but never confirms.
    pub fn refusing(info: PartnerInfo, offers: Vec<Payload>) -> Self {
        PartnerScript::Trades { info, offers, completes: 0 }
    }
}

#[derive(Debug)]
struct ActivePartner {
    info: PartnerInfo,
    upcoming: VecDeque<Payload>,
    completes_left: usize,
    offer_seen: bool,
    backs_out: bool,
}

#[derive(Debug, Default)]
struct SimState {
    memory: HashMap<u64, u8>,
    presses: Vec<Button>,
    scripts: VecDeque<PartnerScript>,
    partner: Option<ActivePartner>,
    box_fresh: bool,
    disconnected: bool,
    drop_on_exchange: u32,
    fail_reconnects: u32,
    reconnects: u32,
    restarts: u32,
    exchanges: u32,
    handed_over: Vec<Vec<u8>>,
    offset_lookups: u32,
    drop_on_exit: u32,
    meeting_blocked: bool,
    stuck: bool,
}

impl SimState {
    fn write(&mut self, offset: u64, data: &[u8]) {
        for (addr, byte) in (offset..).zip(data) {
            self.memory.insert(addr, *byte);
        }
    }

    fn read(&self, offset: u64, len: usize) -> Vec<u8> {
        (offset..offset + len as u64)
            .map(|addr| self.memory.get(&addr).copied().unwrap_or(0))
            .collect()
    }

    fn set_flag(&mut self, offset: u64, on: bool) {
        self.memory.insert(offset, u8::from(on));
    }

    fn show_next_offer(&mut self) -> bool {
        let Some(next) = self.partner.as_mut().and_then(|p| p.upcoming.pop_front()) else {
            return false;
        };
        self.write(OFFER, next.as_bytes());
        if let Some(partner) = self.partner.as_mut() {
            partner.offer_seen = false;
        }
        true
    }

    /// Confirm pressed with a fresh item in the box and an offer on screen:
    /// the partner's item replaces ours.
    fn try_exchange(&mut self) {
        let Some(partner) = self.partner.as_mut() else {
            return;
        };
        if !partner.offer_seen || partner.completes_left == 0 || !self.box_fresh {
            return;
        }
        partner.completes_left -= 1;
        let backs_out = partner.backs_out;
        self.box_fresh = false;

        if backs_out {
            let seal = self.read(BOX_START + SEAL, 1)[0];
            self.write(BOX_START + SEAL, &[seal.wrapping_add(1)]);
            return;
        }
        let ours = self.read(BOX_START, SLOT_SIZE);
        let offered = self.read(OFFER, SLOT_SIZE);
        self.write(BOX_START, &offered);
        self.handed_over.push(ours);
        self.exchanges += 1;
        self.show_next_offer();
    }

    /// Back pressed while an offer has been looked at: the partner moves on
    /// to the next one, or walks away when out of offers.
    fn skip_offer(&mut self) {
        if !self.partner.as_ref().is_some_and(|p| p.offer_seen) {
            return;
        }
        if !self.show_next_offer() {
            self.set_flag(TALKING, false);
        }
    }

    fn answer_exchange(&mut self) {
        match self.scripts.pop_front().unwrap_or(PartnerScript::NoShow) {
            PartnerScript::NoShow => {
                self.partner = None;
            }
            PartnerScript::Stalls => {
                self.partner = None;
                self.set_flag(TALKING, true);
            }
            PartnerScript::Trades { info, offers, completes } => {
                self.partner = Some(ActivePartner {
                    info,
                    upcoming: offers.into(),
                    completes_left: completes,
                    offer_seen: false,
                    backs_out: false,
                });
                self.set_flag(TALKING, true);
                self.set_flag(LOADED, true);
                self.show_next_offer();
            }
            PartnerScript::BacksOut { info, offer } => {
                self.partner = Some(ActivePartner {
                    info,
                    upcoming: VecDeque::from([offer]),
                    completes_left: 1,
                    offer_seen: false,
                    backs_out: true,
                });
                self.set_flag(TALKING, true);
                self.set_flag(LOADED, true);
                self.show_next_offer();
            }
        }
    }

    fn leave_partner(&mut self) {
        self.partner = None;
        self.set_flag(TALKING, false);
        self.set_flag(LOADED, false);
    }
}

/// Scriptable console for sessions and workers.
///
/// Item slots are [`SLOT_SIZE`] bytes: item id (LE u16), form, held item
/// (LE u16), checksum (LE u16), a seal byte and eight data bytes covered by
/// the checksum. The seal changes whenever the console re-stores a slot and
/// is not part of the item's contents.
#[derive(Debug, Default)]
pub struct SimulatedConsole {
    state: Mutex<SimState>,
}

impl SimulatedConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue up the partner for the next exchange request.
    pub fn script(&self, script: PartnerScript) {
        self.state.lock().scripts.push_back(script);
    }

    /// Drop the link on the next `count` exchange requests.
    pub fn drop_on_exchange(&self, count: u32) {
        self.state.lock().drop_on_exchange = count;
    }

    /// Fail the next `count` reconnect attempts.
    pub fn fail_reconnects(&self, count: u32) {
        self.state.lock().fail_reconnects = count;
    }

    /// Drop the link on the next `count` attempts to back out of a trade.
    pub fn drop_on_exit(&self, count: u32) {
        self.state.lock().drop_on_exit = count;
    }

    /// Put the console inside a meeting point, as if an earlier trade left
    /// it there.
    pub fn place_in_meeting_point(&self) {
        self.state.lock().set_flag(IN_MEETING, true);
    }

    /// Confirming the code never lands in the meeting point.
    pub fn block_meeting_point(&self, blocked: bool) {
        self.state.lock().meeting_blocked = blocked;
    }

    /// Backing out of menus always fails.
    pub fn set_stuck(&self, stuck: bool) {
        self.state.lock().stuck = stuck;
    }

    pub fn set_soft_ban(&self, banned: bool) {
        self.state.lock().set_flag(SOFT_BAN, banned);
    }

    pub fn presses(&self) -> Vec<Button> {
        self.state.lock().presses.clone()
    }

    pub fn reconnects(&self) -> u32 {
        self.state.lock().reconnects
    }

    pub fn restarts(&self) -> u32 {
        self.state.lock().restarts
    }

    /// Completed item swaps.
    pub fn exchanges(&self) -> u32 {
        self.state.lock().exchanges
    }

    /// Our side of every completed swap, oldest first.
    pub fn handed_over(&self) -> Vec<Vec<u8>> {
        self.state.lock().handed_over.clone()
    }

    /// Times the offset table was resolved.
    pub fn offset_lookups(&self) -> u32 {
        self.state.lock().offset_lookups
    }

    pub fn in_meeting_point(&self) -> bool {
        self.state.lock().read(IN_MEETING, 1)[0] != 0
    }

    pub fn soft_banned(&self) -> bool {
        self.state.lock().read(SOFT_BAN, 1)[0] != 0
    }

    /// Current contents of the first box slot.
    pub fn box_slot(&self) -> Vec<u8> {
        self.state.lock().read(BOX_START, SLOT_SIZE)
    }

    fn link(&self) -> Result<parking_lot::MutexGuard<'_, SimState>, DeviceError> {
        let state = self.state.lock();
        if state.disconnected {
            return Err(lost());
        }
        Ok(state)
    }
}

fn lost() -> DeviceError {
    DeviceError::Connection(io::Error::new(io::ErrorKind::ConnectionReset, "simulated link dropped"))
}

/// Decode a simulated item slot.
pub fn describe_slot(slot: &[u8]) -> ItemInfo {
    let mut bytes = [0u8; SLOT_SIZE];
    let n = slot.len().min(SLOT_SIZE);
    bytes[..n].copy_from_slice(&slot[..n]);

    let stored = u16::from_le_bytes([bytes[5], bytes[6]]);
    let hash = bytes[..5]
        .iter()
        .chain(&bytes[DATA..])
        .fold(0xcbf2_9ce4_8422_2325u64, |hash, b| {
            (hash ^ u64::from(*b)).wrapping_mul(0x0100_0000_01b3)
        });
    ItemInfo {
        item_id: u16::from_le_bytes([bytes[0], bytes[1]]),
        form: bytes[2],
        held_item: u16::from_le_bytes([bytes[3], bytes[4]]),
        checksum: stored,
        checksum_valid: stored == checksum(&bytes[DATA..]),
        content_hash: hash,
    }
}

pub(crate) fn checksum(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |sum, b| sum.wrapping_add(u16::from(*b)))
}

#[async_trait]
impl RemoteConnection for SimulatedConsole {
    async fn press(&self, button: Button) -> Result<(), DeviceError> {
        let mut state = self.link()?;
        state.presses.push(button);
        match button {
            Button::A => state.try_exchange(),
            Button::B => state.skip_offer(),
            _ => {}
        }
        Ok(())
    }

    async fn hold(&self, button: Button, _hold_ms: u64) -> Result<(), DeviceError> {
        self.link()?.presses.push(button);
        Ok(())
    }

    async fn set_stick(&self, _stick: Stick, _x: i16, _y: i16) -> Result<(), DeviceError> {
        self.link().map(drop)?;
        Ok(())
    }

    async fn peek(&self, offset: u64, len: usize) -> Result<Vec<u8>, DeviceError> {
        let mut state = self.link()?;
        if offset == OFFER && len >= SLOT_SIZE {
            if let Some(partner) = state.partner.as_mut() {
                partner.offer_seen = true;
            }
        }
        Ok(state.read(offset, len))
    }

    async fn poke(&self, offset: u64, data: &[u8]) -> Result<(), DeviceError> {
        let mut state = self.link()?;
        state.write(offset, data);
        if offset == BOX_START {
            state.box_fresh = true;
        }
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        if state.fail_reconnects > 0 {
            state.fail_reconnects -= 1;
            return Err(lost());
        }
        state.disconnected = false;
        state.reconnects += 1;
        Ok(())
    }
}

#[async_trait]
impl ConsoleAdapter for SimulatedConsole {
    fn title(&self) -> &str {
        "simulated"
    }

    fn slot_size(&self) -> usize {
        SLOT_SIZE
    }

    fn describe(&self, slot: &[u8]) -> ItemInfo {
        describe_slot(slot)
    }

    async fn resolve_offsets(&self, _conn: &dyn RemoteConnection) -> Result<OffsetTable, DeviceError> {
        self.link()?.offset_lookups += 1;
        Ok(OffsetTable {
            box_start: BOX_START,
            in_meeting_point: IN_MEETING,
            partner_talking: TALKING,
            partner_loaded: LOADED,
            soft_ban: SOFT_BAN,
        })
    }

    async fn resolve_offer_slot(&self, _conn: &dyn RemoteConnection) -> Result<u64, DeviceError> {
        self.link().map(drop)?;
        Ok(OFFER)
    }

    async fn open_code_entry(&self, _conn: &dyn RemoteConnection, _kind: TradeKind) -> Result<(), DeviceError> {
        self.link()?.presses.push(Button::Plus);
        Ok(())
    }

    async fn confirm_code(&self, _conn: &dyn RemoteConnection) -> Result<(), DeviceError> {
        let mut state = self.link()?;
        state.presses.push(Button::Plus);
        if !state.meeting_blocked {
            state.set_flag(IN_MEETING, true);
        }
        Ok(())
    }

    async fn request_exchange(&self, _conn: &dyn RemoteConnection) -> Result<(), DeviceError> {
        let mut state = self.link()?;
        if state.drop_on_exchange > 0 {
            state.drop_on_exchange -= 1;
            state.disconnected = true;
            return Err(lost());
        }
        state.presses.push(Button::Y);
        state.answer_exchange();
        Ok(())
    }

    async fn read_partner(&self, _conn: &dyn RemoteConnection) -> Result<PartnerInfo, DeviceError> {
        let state = self.link()?;
        state
            .partner
            .as_ref()
            .map(|partner| partner.info.clone())
            .ok_or_else(|| DeviceError::Unexpected("nobody is talking to us".to_string()))
    }

    async fn exit_to_meeting_point(&self, _conn: &dyn RemoteConnection, _offsets: &OffsetTable) -> Result<bool, DeviceError> {
        let mut state = self.link()?;
        if state.drop_on_exit > 0 {
            state.drop_on_exit -= 1;
            state.disconnected = true;
            return Err(lost());
        }
        if state.stuck {
            return Ok(false);
        }
        state.leave_partner();
        Ok(true)
    }

    async fn leave_meeting_point(&self, _conn: &dyn RemoteConnection, _offsets: &OffsetTable) -> Result<bool, DeviceError> {
        let mut state = self.link()?;
        if state.stuck {
            return Ok(false);
        }
        state.set_flag(IN_MEETING, false);
        Ok(true)
    }

    async fn restart_title(&self, _conn: &dyn RemoteConnection) -> Result<(), DeviceError> {
        let mut state = self.link()?;
        state.restarts += 1;
        state.leave_partner();
        state.set_flag(IN_MEETING, false);
        tracing::debug!(restarts = state.restarts, "simulated title restart");
        Ok(())
    }

    async fn clear_soft_ban(&self, _conn: &dyn RemoteConnection, _offsets: &OffsetTable) -> Result<(), DeviceError> {
        self.link()?.set_flag(SOFT_BAN, false);
        Ok(())
    }
}
