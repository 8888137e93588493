// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! C2 — the resource tree.
//!
//! Every long-lived object in the daemon (the listener, an accepted
//! connection's observer, a worker, a command) is a node here. Nodes form
//! a strict tree: destroying a node destroys its subtree, and a node's
//! event sources (registered through this module, which forwards to the
//! nearest ancestor's [`Reactor`]) never outlive it.
//!
//! Node payloads are `Box<dyn Any>` keyed by a [`NodeKind`] impl rather
//! than by a registered table of `init`/`destroy` function pointers — the
//! original's `get_data` casts a `void *` at the call site; here the
//! compiler checks the cast at `get_data::<T>()` instead.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::os::fd::RawFd;
use std::time::Duration;

use nix::sys::epoll::{EpollFlags, EpollTimeout};
use nix::sys::signal::Signal;
use nix::unistd::Pid;

use crate::error::TreeError;
use crate::id::{NodeFlags, NodeHandle, NodeId, ResourceType};
use crate::reactor::{EventDetail, Reactor, SourceKey};

pub trait NodeKind: Any + Sized {
    const TYPE: ResourceType;

    /// Called once, after the subtree under this node has already been
    /// torn down and its own event sources unregistered.
    fn destroy(self, tree: &mut ResourceTree, handle: NodeHandle) {
        let _ = (tree, handle);
    }
}

type Callback = Box<dyn FnMut(&mut ResourceTree, NodeHandle, EventDetail)>;

/// A registered handler together with the node that registered it — the
/// reactor only knows about the loop-owning ancestor, so this is what lets
/// `run_event_loop` hand the callback *its own* node rather than the
/// owner's.
struct CallbackEntry {
    node: NodeHandle,
    callback: Callback,
}

struct NodeEntry {
    id: NodeId,
    type_name: &'static str,
    type_id: TypeId,
    flags: NodeFlags,
    parent: Option<NodeHandle>,
    children: Vec<NodeHandle>,
    data: Box<dyn Any>,
    destroy_fn: Box<dyn FnOnce(Box<dyn Any>, &mut ResourceTree, NodeHandle)>,
    owned_sources: Vec<(NodeHandle, SourceKey)>,
}

struct Slot {
    generation: u32,
    entry: Option<NodeEntry>,
}

pub struct ResourceTree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    event_loops: HashMap<NodeHandle, Reactor>,
    callbacks: HashMap<(NodeHandle, SourceKey), CallbackEntry>,
    exit_requested: HashMap<NodeHandle, i32>,
}

impl Default for ResourceTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceTree {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            event_loops: HashMap::new(),
            callbacks: HashMap::new(),
            exit_requested: HashMap::new(),
        }
    }

    fn entry(&self, handle: NodeHandle) -> Result<&NodeEntry, TreeError> {
        let slot = self.slots.get(handle.index as usize).ok_or(TreeError::NoSuchNode(handle))?;
        if slot.generation != handle.generation {
            return Err(TreeError::NoSuchNode(handle));
        }
        slot.entry.as_ref().ok_or(TreeError::NoSuchNode(handle))
    }

    fn entry_mut(&mut self, handle: NodeHandle) -> Result<&mut NodeEntry, TreeError> {
        let slot = self.slots.get_mut(handle.index as usize).ok_or(TreeError::NoSuchNode(handle))?;
        if slot.generation != handle.generation {
            return Err(TreeError::NoSuchNode(handle));
        }
        slot.entry.as_mut().ok_or(TreeError::NoSuchNode(handle))
    }

    /// Creates a node of kind `T` under `parent` (`None` only valid for the
    /// single top-level/root node).
    pub fn create<T: NodeKind>(
        &mut self,
        parent: Option<NodeHandle>,
        id: impl Into<NodeId>,
        flags: NodeFlags,
        data: T,
    ) -> Result<NodeHandle, TreeError> {
        let id = id.into();
        if let Some(p) = parent {
            if self.get_child(p, &id)?.is_some() {
                return Err(TreeError::DuplicateId(p, id));
            }
        }

        let destroy_fn: Box<dyn FnOnce(Box<dyn Any>, &mut ResourceTree, NodeHandle)> =
            Box::new(|data, tree, handle| {
                if let Ok(concrete) = data.downcast::<T>() {
                    concrete.destroy(tree, handle);
                }
            });

        let entry = NodeEntry {
            id,
            type_name: T::TYPE.name,
            type_id: TypeId::of::<T>(),
            flags,
            parent,
            children: Vec::new(),
            data: Box::new(data),
            destroy_fn,
            owned_sources: Vec::new(),
        };

        let handle = if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.entry = Some(entry);
            NodeHandle { index, generation: slot.generation }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot { generation: 0, entry: Some(entry) });
            NodeHandle { index, generation: 0 }
        };

        if let Some(p) = parent {
            self.entry_mut(p)?.children.push(handle);
        }

        if T::TYPE.owns_event_loop {
            self.event_loops.insert(handle, Reactor::new()?);
        }

        Ok(handle)
    }

    pub fn get_data<T: NodeKind>(&self, handle: NodeHandle) -> Result<&T, TreeError> {
        self.entry(handle)?.data.downcast_ref::<T>().ok_or(TreeError::WrongType(handle))
    }

    pub fn get_data_mut<T: NodeKind>(&mut self, handle: NodeHandle) -> Result<&mut T, TreeError> {
        self.entry_mut(handle)?.data.downcast_mut::<T>().ok_or(TreeError::WrongType(handle))
    }

    pub fn is_type_of<T: NodeKind>(&self, handle: NodeHandle) -> bool {
        self.entry(handle).map(|e| e.type_id == TypeId::of::<T>()).unwrap_or(false)
    }

    pub fn is_ancestor_of_type<T: NodeKind>(&self, handle: NodeHandle) -> bool {
        let mut cur = self.entry(handle).ok().and_then(|e| self.walk_up_from(e));
        while let Some(h) = cur {
            if self.is_type_of::<T>(h) {
                return true;
            }
            cur = self.entry(h).ok().and_then(|e| self.walk_up_from(e));
        }
        false
    }

    /// The next node reached by walking up from `entry`, or `None` if
    /// `entry` itself has no parent or is flagged `RESTRICT_WALK_UP` (a walk
    /// may see the flagged node but may not climb past it).
    fn walk_up_from(&self, entry: &NodeEntry) -> Option<NodeHandle> {
        if entry.flags.contains(NodeFlags::RESTRICT_WALK_UP) {
            return None;
        }
        entry.parent
    }

    pub fn get_id(&self, handle: NodeHandle) -> Result<&NodeId, TreeError> {
        Ok(&self.entry(handle)?.id)
    }

    pub fn get_full_id(&self, handle: NodeHandle) -> Result<String, TreeError> {
        let mut parts = vec![self.get_id(handle)?.to_string()];
        let mut cur = self.walk_up_from(self.entry(handle)?);
        while let Some(h) = cur {
            parts.push(self.get_id(h)?.to_string());
            cur = self.walk_up_from(self.entry(h)?);
        }
        parts.reverse();
        Ok(parts.join("/"))
    }

    pub fn get_parent(&self, handle: NodeHandle) -> Result<Option<NodeHandle>, TreeError> {
        Ok(self.entry(handle)?.parent)
    }

    /// Walks upward from `handle` to the highest ancestor reachable without
    /// crossing a `RESTRICT_WALK_UP` boundary.
    pub fn get_top_level(&self, handle: NodeHandle) -> Result<NodeHandle, TreeError> {
        let mut cur = handle;
        while let Some(p) = self.walk_up_from(self.entry(cur)?) {
            cur = p;
        }
        Ok(cur)
    }

    pub fn get_child(&self, parent: NodeHandle, id: &str) -> Result<Option<NodeHandle>, TreeError> {
        for &child in &self.entry(parent)?.children {
            if self.get_id(child)? == id {
                return Ok(Some(child));
            }
        }
        Ok(None)
    }

    pub fn get_children_count(&self, handle: NodeHandle) -> Result<usize, TreeError> {
        Ok(self.entry(handle)?.children.len())
    }

    pub fn children(&self, handle: NodeHandle) -> Result<Vec<NodeHandle>, TreeError> {
        Ok(self.entry(handle)?.children.clone())
    }

    /// Children of `handle` whose kind is `T`, matching
    /// `sid_resource_is_registered_by`-style filtered iteration.
    pub fn children_of_type<T: NodeKind>(&self, handle: NodeHandle) -> Result<Vec<NodeHandle>, TreeError> {
        Ok(self
            .entry(handle)?
            .children
            .iter()
            .copied()
            .filter(|&c| self.is_type_of::<T>(c))
            .collect())
    }

    /// Live children of `handle` whose kind is `T`, in their current
    /// sibling order. Used by [`ChildIter`] to re-derive a cursor position
    /// against the tree's present state rather than a stale snapshot.
    fn live_children_of_type<T: NodeKind>(&self, handle: NodeHandle) -> Vec<NodeHandle> {
        self.entry(handle)
            .map(|e| e.children.iter().copied().filter(|&c| self.is_type_of::<T>(c)).collect())
            .unwrap_or_default()
    }

    /// Opens a cursor over `parent`'s children of kind `T`. Unlike
    /// [`ResourceTree::children_of_type`]'s one-shot `Vec` snapshot, the
    /// cursor is re-resolved against the live tree on every `next`/
    /// `previous` call: it is stable against insertion of new siblings,
    /// and destroying the node it currently sits on merely invalidates
    /// that one cursor, which recovers to the sibling that took its place
    /// on the next advance.
    pub fn iter_create<T: NodeKind>(&self, parent: NodeHandle) -> Result<ChildIter<T>, TreeError> {
        self.entry(parent)?;
        Ok(ChildIter { parent, cursor: Cursor::Before, _marker: std::marker::PhantomData })
    }

    fn find_loop_owner(&self, handle: NodeHandle) -> Result<NodeHandle, TreeError> {
        let mut cur = Some(handle);
        while let Some(h) = cur {
            if self.event_loops.contains_key(&h) {
                return Ok(h);
            }
            cur = self.entry(h)?.parent;
        }
        Err(TreeError::NoLoopOwner(handle))
    }

    pub fn register_io(
        &mut self,
        node: NodeHandle,
        fd: RawFd,
        interest: EpollFlags,
        handler: impl FnMut(&mut ResourceTree, NodeHandle, EventDetail) + 'static,
    ) -> Result<SourceKey, TreeError> {
        let loop_owner = self.find_loop_owner(node)?;
        let key = self
            .event_loops
            .get_mut(&loop_owner)
            .ok_or(TreeError::NoLoopOwner(node))?
            .register_io(fd, interest)?;
        self.callbacks.insert((loop_owner, key), CallbackEntry { node, callback: Box::new(handler) });
        self.entry_mut(node)?.owned_sources.push((loop_owner, key));
        Ok(key)
    }

    pub fn register_signal(
        &mut self,
        node: NodeHandle,
        signum: Signal,
        handler: impl FnMut(&mut ResourceTree, NodeHandle, EventDetail) + 'static,
    ) -> Result<SourceKey, TreeError> {
        let loop_owner = self.find_loop_owner(node)?;
        let key = self
            .event_loops
            .get_mut(&loop_owner)
            .ok_or(TreeError::NoLoopOwner(node))?
            .register_signal(signum)?;
        self.callbacks.insert((loop_owner, key), CallbackEntry { node, callback: Box::new(handler) });
        self.entry_mut(node)?.owned_sources.push((loop_owner, key));
        Ok(key)
    }

    pub fn register_child(
        &mut self,
        node: NodeHandle,
        pid: Pid,
        handler: impl FnMut(&mut ResourceTree, NodeHandle, EventDetail) + 'static,
    ) -> Result<SourceKey, TreeError> {
        let loop_owner = self.find_loop_owner(node)?;
        let key = self
            .event_loops
            .get_mut(&loop_owner)
            .ok_or(TreeError::NoLoopOwner(node))?
            .register_child(pid)?;
        self.callbacks.insert((loop_owner, key), CallbackEntry { node, callback: Box::new(handler) });
        self.entry_mut(node)?.owned_sources.push((loop_owner, key));
        Ok(key)
    }

    pub fn register_time(
        &mut self,
        node: NodeHandle,
        interval: Duration,
        one_shot: bool,
        handler: impl FnMut(&mut ResourceTree, NodeHandle, EventDetail) + 'static,
    ) -> Result<SourceKey, TreeError> {
        let loop_owner = self.find_loop_owner(node)?;
        let key = self
            .event_loops
            .get_mut(&loop_owner)
            .ok_or(TreeError::NoLoopOwner(node))?
            .register_time(interval, one_shot)?;
        self.callbacks.insert((loop_owner, key), CallbackEntry { node, callback: Box::new(handler) });
        self.entry_mut(node)?.owned_sources.push((loop_owner, key));
        Ok(key)
    }

    /// Schedules `handler` to run once on the owning loop's next turn —
    /// used to construct a command node and dispatch it in two steps.
    pub fn register_deferred(
        &mut self,
        node: NodeHandle,
        handler: impl FnMut(&mut ResourceTree, NodeHandle, EventDetail) + 'static,
    ) -> Result<SourceKey, TreeError> {
        let loop_owner = self.find_loop_owner(node)?;
        let key = self
            .event_loops
            .get_mut(&loop_owner)
            .ok_or(TreeError::NoLoopOwner(node))?
            .register_deferred();
        self.callbacks.insert((loop_owner, key), CallbackEntry { node, callback: Box::new(handler) });
        self.entry_mut(node)?.owned_sources.push((loop_owner, key));
        Ok(key)
    }

    pub fn destroy_source(&mut self, node: NodeHandle, key: SourceKey) -> Result<(), TreeError> {
        let entry = self.entry_mut(node)?;
        let pos = entry.owned_sources.iter().position(|&(_, k)| k == key);
        let Some(pos) = pos else { return Ok(()) };
        let (loop_owner, key) = entry.owned_sources.remove(pos);
        if let Some(reactor) = self.event_loops.get_mut(&loop_owner) {
            reactor.destroy(key)?;
        }
        self.callbacks.remove(&(loop_owner, key));
        Ok(())
    }

    /// Destroys `handle` and its entire subtree, leaves first.
    pub fn destroy(&mut self, handle: NodeHandle) -> Result<(), TreeError> {
        let children = self.children(handle)?;
        for child in children {
            self.destroy(child)?;
        }

        let owned_sources = std::mem::take(&mut self.entry_mut(handle)?.owned_sources);
        for (loop_owner, key) in owned_sources {
            if let Some(reactor) = self.event_loops.get_mut(&loop_owner) {
                reactor.destroy(key)?;
            }
            self.callbacks.remove(&(loop_owner, key));
        }

        if let Some(parent) = self.entry(handle)?.parent {
            self.entry_mut(parent)?.children.retain(|&c| c != handle);
        }

        self.event_loops.remove(&handle);
        self.exit_requested.remove(&handle);

        let slot = &mut self.slots[handle.index as usize];
        let entry = slot.entry.take().ok_or(TreeError::NoSuchNode(handle))?;
        self.free.push(handle.index);

        (entry.destroy_fn)(entry.data, self, handle);
        Ok(())
    }

    /// Isolates `handle`: detaches it from its parent without destroying
    /// it, subject to `DISALLOW_ISOLATION`.
    pub fn isolate(&mut self, handle: NodeHandle) -> Result<(), TreeError> {
        let entry = self.entry(handle)?;
        if entry.flags.contains(NodeFlags::DISALLOW_ISOLATION) {
            return Err(TreeError::IsolationDisallowed(handle));
        }
        if !entry.children.is_empty() {
            return Err(TreeError::WalkRestricted(handle));
        }
        if let Some(parent) = entry.parent {
            self.entry_mut(parent)?.children.retain(|&c| c != handle);
        }
        self.entry_mut(handle)?.parent = None;
        Ok(())
    }

    pub fn isolate_with_children(&mut self, handle: NodeHandle) -> Result<(), TreeError> {
        let entry = self.entry(handle)?;
        if entry.flags.contains(NodeFlags::DISALLOW_ISOLATION) {
            return Err(TreeError::IsolationDisallowed(handle));
        }
        if let Some(parent) = entry.parent {
            self.entry_mut(parent)?.children.retain(|&c| c != handle);
        }
        self.entry_mut(handle)?.parent = None;
        Ok(())
    }

    pub fn exit_event_loop(&mut self, node: NodeHandle, code: i32) -> Result<(), TreeError> {
        let loop_owner = self.find_loop_owner(node)?;
        self.exit_requested.insert(loop_owner, code);
        Ok(())
    }

    /// Runs the event loop owned by `handle` until
    /// [`ResourceTree::exit_event_loop`] is called against it.
    pub fn run_event_loop(&mut self, handle: NodeHandle) -> Result<i32, TreeError> {
        if !self.event_loops.contains_key(&handle) {
            return Err(TreeError::NoEventLoop(handle));
        }
        self.exit_requested.remove(&handle);
        loop {
            if let Some(code) = self.exit_requested.remove(&handle) {
                return Ok(code);
            }
            let mut reactor = self.event_loops.remove(&handle).ok_or(TreeError::NoEventLoop(handle))?;
            let ready = reactor.poll(EpollTimeout::NONE);
            self.event_loops.insert(handle, reactor);
            let ready = ready?;

            for (key, detail) in ready {
                let one_shot = matches!(detail, EventDetail::Deferred | EventDetail::Child { .. });
                if let Some(CallbackEntry { node, mut callback }) = self.callbacks.remove(&(handle, key)) {
                    callback(self, node, detail);
                    let still_live = self
                        .event_loops
                        .get(&handle)
                        .map(|r| r.contains(key))
                        .unwrap_or(false);
                    if !one_shot && still_live {
                        self.callbacks.insert((handle, key), CallbackEntry { node, callback });
                    }
                }
            }

            if let Some(code) = self.exit_requested.remove(&handle) {
                return Ok(code);
            }
        }
    }

    pub fn dump_dot(&self) -> String {
        let mut out = String::from("digraph resources {\n");
        for (index, slot) in self.slots.iter().enumerate() {
            let Some(entry) = &slot.entry else { continue };
            let handle = NodeHandle { index: index as u32, generation: slot.generation };
            out.push_str(&format!(
                "  \"{}\" [label=\"{} ({})\"];\n",
                self.get_full_id(handle).unwrap_or_default(),
                entry.id,
                entry.type_name
            ));
            if let Some(parent) = entry.parent {
                out.push_str(&format!(
                    "  \"{}\" -> \"{}\";\n",
                    self.get_full_id(parent).unwrap_or_default(),
                    self.get_full_id(handle).unwrap_or_default()
                ));
            }
        }
        out.push_str("}\n");
        out
    }
}

#[derive(Clone, Copy)]
enum Cursor {
    Before,
    At(NodeHandle, usize),
    After,
}

/// A stateful cursor over one parent's children of kind `T`
/// (`iter_create`/`next`/`previous`/`reset`/`destroy`, mirroring
/// `sid_resource_iter_*`). Each step re-resolves the cursor's last handle
/// against the parent's live children rather than trusting a cached
/// index, so:
///
/// - inserting a new sibling anywhere does not perturb an in-flight
///   cursor — the handle it currently sits on is still found by identity;
/// - destroying the node a cursor currently sits on invalidates only that
///   cursor: the next `next()`/`previous()` call falls back to the
///   recorded index, which now names the sibling that slid into the
///   destroyed node's old slot;
/// - a *different* cursor that had not yet visited the destroyed node
///   simply never sees it, since it no longer appears in the live list.
pub struct ChildIter<T: NodeKind> {
    parent: NodeHandle,
    cursor: Cursor,
    _marker: std::marker::PhantomData<T>,
}

impl<T: NodeKind> ChildIter<T> {
    pub fn next(&mut self, tree: &ResourceTree) -> Option<NodeHandle> {
        let siblings = tree.live_children_of_type::<T>(self.parent);
        let target = match self.cursor {
            Cursor::Before => 0,
            Cursor::After => return None,
            // Found: advance past it. Gone: its old slot was filled by
            // the sibling that used to follow it, so that slot itself is
            // the next unvisited element.
            Cursor::At(handle, hint) => {
                siblings.iter().position(|&h| h == handle).map(|p| p + 1).unwrap_or(hint)
            }
        };
        match siblings.get(target) {
            Some(&h) => {
                self.cursor = Cursor::At(h, target);
                Some(h)
            }
            None => {
                self.cursor = Cursor::After;
                None
            }
        }
    }

    pub fn previous(&mut self, tree: &ResourceTree) -> Option<NodeHandle> {
        let siblings = tree.live_children_of_type::<T>(self.parent);
        let target = match self.cursor {
            Cursor::Before => return None,
            Cursor::After => siblings.len().checked_sub(1),
            // Found: step back one. Gone: nothing before its old slot
            // shifted, so the predecessor is still one index back.
            Cursor::At(handle, hint) => {
                let pos = siblings.iter().position(|&h| h == handle).unwrap_or(hint);
                pos.checked_sub(1)
            }
        };
        match target {
            Some(t) => match siblings.get(t) {
                Some(&h) => {
                    self.cursor = Cursor::At(h, t);
                    Some(h)
                }
                None => {
                    self.cursor = Cursor::Before;
                    None
                }
            },
            None => {
                self.cursor = Cursor::Before;
                None
            }
        }
    }

    /// Rewinds the cursor to before the first child.
    pub fn reset(&mut self) {
        self.cursor = Cursor::Before;
    }

    /// No-op in Rust — `self` is simply dropped — kept so the call sites
    /// read the same as the `_iter_create`/`_iter_next`/`_iter_destroy`
    /// sequence it is modeled on.
    pub fn destroy(self) {}
}

#[path = "tree_tests.rs"]
#[cfg(test)]
mod tests;
