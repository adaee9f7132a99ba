//! Stateless slots: event handlers whose effect is rehearsed once and then replayed client-side.
//!
//! A slot moves through [`LearnState`]s: `Unlearned → Learning → Learned | Incomplete`.
//! Only [`LearnState::Learned`] slots skip the server round trip. The learning itself is driven by
//! [`Renderer::learn`](`crate::renderer::Renderer::learn`), which owns the change collection machinery.

use crate::{app::Application, rc_hash_map::RcHashMap, widget::WidgetId};
use core::fmt::{self, Display, Formatter};
use tracing::{trace, warn};

/// Identifies a stateless slot by the DOM id of its sender and the signal name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(String);

impl SlotId {
	#[must_use]
	pub fn new(sender_dom_id: &str, signal: &str) -> Self {
		Self(format!("{}.{}", sender_dom_id, signal))
	}

	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl Display for SlotId {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotType {
	/// Rehearsed ahead of time and undone. The application is unaffected until the client triggers it.
	PreLearnStateless,
	/// Learned the first time it really runs. The effect is kept and sent along with the learned script.
	AutoLearnStateless,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LearnState {
	Unlearned,
	Learning,
	/// The cached client-side implementation.
	Learned(String),
	/// The effect can't be captured client-side. The slot always runs server-side until invalidated.
	Incomplete,
}

/// An event handler that supports rehearsal.
pub trait StatelessSlot: Send {
	fn slot_type(&self) -> SlotType;

	fn trigger(&mut self, app: &mut Application);

	/// Reverses exactly the effect of the preceding [`StatelessSlot::trigger`].
	fn undo_trigger(&mut self, app: &mut Application);
}

/// Result of a client-side trigger reaching the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotOutcome {
	/// Served from the cache. No widget was consulted.
	Cached(String),
	/// Learned just now. The script is also part of the pending response.
	Learned(String),
	/// Ran as an ordinary server-side handler.
	ServerSide,
	/// No such slot is exposed.
	Unknown,
}

pub struct SlotEntry {
	/// Lent out while the slot runs.
	handler: Option<Box<dyn StatelessSlot>>,
	slot_type: SlotType,
	sender: Option<WidgetId>,
	state: LearnState,
}

impl fmt::Debug for SlotEntry {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("SlotEntry")
			.field("slot_type", &self.slot_type)
			.field("sender", &self.sender)
			.field("state", &self.state)
			.finish()
	}
}

/// Exposed stateless slots, reference-counted by the widgets that expose them.
///
/// A slot whose count dropped to zero keeps its learned script until the next [`SlotRegistry::purge`].
#[derive(Default)]
pub struct SlotRegistry {
	slots: RcHashMap<SlotId, u16, SlotEntry>,
}

impl fmt::Debug for SlotRegistry {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_map().entries(self.slots.iter()).finish()
	}
}

impl SlotRegistry {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds a reference to `id`, registering `handler` if the slot is new.
	///
	/// Returns `false` if the reference count is saturated.
	pub fn expose(&mut self, id: SlotId, sender: Option<WidgetId>, handler: Box<dyn StatelessSlot>) -> bool {
		let slot_type = handler.slot_type();
		match self.slots.increment_or_insert_with(id.clone(), move || SlotEntry {
			handler: Some(handler),
			slot_type,
			sender,
			state: LearnState::Unlearned,
		}) {
			Ok(_) => true,
			Err(_) => {
				warn!("Too many (more than 65k) references to stateless slot {}.", id);
				false
			}
		}
	}

	/// Drops one reference to `id`.
	pub fn unexpose(&mut self, id: &SlotId) {
		if self.slots.weak_decrement(id).is_err() {
			warn!("Stateless slot {} was unexposed more often than it was exposed.", id);
		}
	}

	/// Removes all slots that are no longer referenced. Returns how many were dropped.
	pub fn purge(&mut self) -> usize {
		let purged = self.slots.drain_weak().count();
		if purged > 0 {
			trace!("Purged {} unreferenced stateless slot(s).", purged);
		}
		purged
	}

	#[must_use]
	pub fn state(&self, id: &SlotId) -> Option<&LearnState> {
		self.slots.get(id).map(|entry| &entry.state)
	}

	#[must_use]
	pub fn slot_type(&self, id: &SlotId) -> Option<SlotType> {
		self.slots.get(id).map(|entry| entry.slot_type)
	}

	#[must_use]
	pub fn sender(&self, id: &SlotId) -> Option<WidgetId> {
		self.slots.get(id).and_then(|entry| entry.sender)
	}

	/// How many exposures currently keep `id` alive. `Some(0)` until the next purge.
	#[must_use]
	pub fn references(&self, id: &SlotId) -> Option<u16> {
		self.slots.count(id).copied()
	}

	#[must_use]
	pub fn contains(&self, id: &SlotId) -> bool {
		self.slots.get(id).is_some()
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.slots.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.slots.is_empty()
	}

	/// Forgets what was learned about `id`, e.g. because the structure its script addresses changed.
	pub fn invalidate(&mut self, id: &SlotId) {
		if let Some(entry) = self.slots.get_mut(id) {
			trace!("Invalidating stateless slot {} ({:?}).", id, entry.state);
			entry.state = LearnState::Unlearned;
		}
	}

	/// Invalidates every slot sent by `sender`.
	pub fn invalidate_sender(&mut self, sender: WidgetId) {
		for entry in self.slots.values_mut() {
			if entry.sender == Some(sender) {
				entry.state = LearnState::Unlearned;
			}
		}
	}

	/// Slots of `slot_type` that haven't been learned yet, in a stable order.
	#[must_use]
	pub fn unlearned(&self, slot_type: SlotType) -> Vec<SlotId> {
		let mut ids: Vec<SlotId> = self
			.slots
			.iter()
			.filter(|(_, entry)| entry.slot_type == slot_type && entry.state == LearnState::Unlearned)
			.map(|(id, _)| id.clone())
			.collect();
		ids.sort();
		ids
	}

	pub(crate) fn set_state(&mut self, id: &SlotId, state: LearnState) {
		if let Some(entry) = self.slots.get_mut(id) {
			entry.state = state;
		}
	}

	pub(crate) fn take_handler(&mut self, id: &SlotId) -> Option<Box<dyn StatelessSlot>> {
		self.slots.get_mut(id)?.handler.take()
	}

	pub(crate) fn restore_handler(&mut self, id: &SlotId, handler: Box<dyn StatelessSlot>) {
		match self.slots.get_mut(id) {
			Some(entry) => entry.handler = Some(handler),
			None => trace!("Stateless slot {} was purged while it ran.", id),
		}
	}
}
