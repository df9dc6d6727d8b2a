//! The VM's memory: an arena of tagged nodes with a free list.
//!
//! Every runtime value is a node. Booleans, numbers and strings are boxed like everything
//! else, so the VM's operand stack only ever holds [`Address`]es. Five singletons (`true`,
//! `false`, `null`, `undefined` and the unassigned marker) are allocated when the heap is
//! created and are never freed.
//!
//! Nothing here is garbage collected. A node lives until the compiled program frees it with
//! `DROP`/`DROP_POP`, or until the VM pops a block or call frame it no longer needs.
//!
//! Strings are interned by content: allocating an equal string returns the existing node
//! and bumps its reference count in the pool, and freeing only releases the node once the
//! count drops to zero.

use std::collections::HashMap;
use std::fmt;

use smallvec::{SmallVec, smallvec};
use tracing::{debug, trace};

use crate::Error;
use crate::ast::{NumberType, Value};
use crate::builtins::{BuiltinOp, Constant};

/// Handle of a node in the heap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(u32);

impl Address {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// A compile-time resolved `[frame, slot]` pair into an environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    pub frame: usize,
    pub slot: usize,
}

impl Position {
    pub fn new(frame: usize, slot: usize) -> Self {
        Position { frame, slot }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.frame, self.slot)
    }
}

/// The kind of a node, as far as the VM's tag predicates are concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Free,
    False,
    True,
    Null,
    Unassigned,
    Undefined,
    Number,
    String,
    Closure,
    Blockframe,
    Callframe,
    Builtin,
    Frame,
    Environment,
    Reference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Singleton {
    False,
    True,
    Null,
    Unassigned,
    Undefined,
}

impl Singleton {
    const ALL: [Singleton; 5] = [
        Singleton::False,
        Singleton::True,
        Singleton::Null,
        Singleton::Unassigned,
        Singleton::Undefined,
    ];

    fn tag(self) -> Tag {
        match self {
            Singleton::False => Tag::False,
            Singleton::True => Tag::True,
            Singleton::Null => Tag::Null,
            Singleton::Unassigned => Tag::Unassigned,
            Singleton::Undefined => Tag::Undefined,
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Free { next: Option<Address> },
    Singleton(Singleton),
    Number(NumberType),
    /// Key into the string pool: hash bucket and index within the bucket
    String { hash: u32, index: u16 },
    Closure { arity: u8, pc: usize, env: Address },
    Blockframe { env: Address },
    Callframe { pc: usize, env: Address },
    Builtin { id: u8 },
    Frame(SmallVec<[Address; 4]>),
    Environment(SmallVec<[Address; 8]>),
    Reference { frame: Address, slot: usize },
}

impl Node {
    fn tag(&self) -> Tag {
        match self {
            Node::Free { .. } => Tag::Free,
            Node::Singleton(singleton) => singleton.tag(),
            Node::Number(_) => Tag::Number,
            Node::String { .. } => Tag::String,
            Node::Closure { .. } => Tag::Closure,
            Node::Blockframe { .. } => Tag::Blockframe,
            Node::Callframe { .. } => Tag::Callframe,
            Node::Builtin { .. } => Tag::Builtin,
            Node::Frame(_) => Tag::Frame,
            Node::Environment(_) => Tag::Environment,
            Node::Reference { .. } => Tag::Reference,
        }
    }

    fn children(&self) -> &[Address] {
        match self {
            Node::Closure { env, .. } | Node::Blockframe { env } | Node::Callframe { env, .. } => {
                std::slice::from_ref(env)
            }
            Node::Reference { frame, .. } => std::slice::from_ref(frame),
            Node::Frame(children) => children,
            Node::Environment(frames) => frames,
            _ => &[],
        }
    }

    fn children_mut(&mut self) -> &mut [Address] {
        match self {
            Node::Closure { env, .. } | Node::Blockframe { env } | Node::Callframe { env, .. } => {
                std::slice::from_mut(env)
            }
            Node::Reference { frame, .. } => std::slice::from_mut(frame),
            Node::Frame(children) => children,
            Node::Environment(frames) => frames,
            _ => &mut [],
        }
    }
}

#[derive(Debug)]
struct PooledString {
    address: Address,
    string: String,
    refs: usize,
}

/// djb2 over UTF-16 code units, wrapping at 32 bits
pub(crate) fn hash_string(string: &str) -> u32 {
    string.encode_utf16().fold(5381u32, |hash, unit| {
        hash.wrapping_shl(5)
            .wrapping_add(hash)
            .wrapping_add(u32::from(unit))
    })
}

pub struct Heap {
    nodes: Vec<Node>,
    capacity: usize,
    free: Option<Address>,
    live: usize,
    /// Buckets keyed by hash; a freed entry leaves `None` so indices stay stable
    string_pool: HashMap<u32, Vec<Option<PooledString>>>,
    singletons: [Address; 5],
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("capacity", &self.capacity)
            .field("live", &self.live)
            .field("interned", &self.interned_count())
            .finish()
    }
}

impl Heap {
    /// Create a heap holding at most `capacity` live nodes, with the singletons allocated
    pub fn new(capacity: usize) -> Result<Self, Error> {
        let mut heap = Heap {
            nodes: Vec::new(),
            capacity,
            free: None,
            live: 0,
            string_pool: HashMap::new(),
            singletons: [Address(0); 5],
        };
        for (i, singleton) in Singleton::ALL.into_iter().enumerate() {
            heap.singletons[i] = heap.allocate(Node::Singleton(singleton))?;
        }
        Ok(heap)
    }

    fn allocate(&mut self, node: Node) -> Result<Address, Error> {
        let address = match self.free {
            Some(address) => {
                let slot = self
                    .nodes
                    .get_mut(address.index())
                    .ok_or_else(|| Error::Internal(format!("corrupt free list at {address}")))?;
                let Node::Free { next } = *slot else {
                    return Err(Error::Internal(format!("free list entry {address} is live")));
                };
                self.free = next;
                *slot = node;
                address
            }
            None if self.nodes.len() < self.capacity => {
                let index = u32::try_from(self.nodes.len()).map_err(|_| Error::OutOfMemory)?;
                self.nodes.push(node);
                Address(index)
            }
            None => return Err(Error::OutOfMemory),
        };
        self.live += 1;
        Ok(address)
    }

    fn node(&self, address: Address) -> Result<&Node, Error> {
        self.nodes
            .get(address.index())
            .ok_or_else(|| Error::Internal(format!("address {address} is outside the heap")))
    }

    fn node_mut(&mut self, address: Address) -> Result<&mut Node, Error> {
        self.nodes
            .get_mut(address.index())
            .ok_or_else(|| Error::Internal(format!("address {address} is outside the heap")))
    }

    /// Return a node to the free list. Singletons are never freed, and an interned string is
    /// only released once its last owner frees it. Freeing a node twice is an error.
    pub fn free_node(&mut self, address: Address) -> Result<(), Error> {
        let pooled = match self.node(address)? {
            Node::Singleton(_) => return Ok(()),
            Node::Free { .. } => {
                return Err(Error::Internal(format!("double free of {address}")));
            }
            Node::String { hash, index } => Some((*hash, usize::from(*index))),
            _ => None,
        };

        if let Some((hash, index)) = pooled {
            let bucket = self
                .string_pool
                .get_mut(&hash)
                .ok_or_else(|| Error::Internal(format!("string {address} is not pooled")))?;
            let entry = bucket
                .get_mut(index)
                .and_then(Option::as_mut)
                .ok_or_else(|| Error::Internal(format!("string {address} is not pooled")))?;
            entry.refs -= 1;
            if entry.refs > 0 {
                trace!(%address, refs = entry.refs, "released string reference");
                return Ok(());
            }
            bucket[index] = None;
            if bucket.iter().all(Option::is_none) {
                self.string_pool.remove(&hash);
            }
        }

        let next = self.free;
        *self.node_mut(address)? = Node::Free { next };
        self.free = Some(address);
        self.live -= 1;
        debug!(%address, live = self.live, "freed node");
        Ok(())
    }

    /// Number of nodes currently allocated, singletons included
    pub fn live_nodes(&self) -> usize {
        self.live
    }

    /// Number of distinct strings currently interned
    pub fn interned_count(&self) -> usize {
        self.string_pool
            .values()
            .map(|bucket| bucket.iter().flatten().count())
            .sum()
    }

    pub fn tag(&self, address: Address) -> Result<Tag, Error> {
        Ok(self.node(address)?.tag())
    }

    fn has_tag(&self, address: Address, tag: Tag) -> bool {
        self.tag(address).is_ok_and(|t| t == tag)
    }

    pub fn is_false(&self, address: Address) -> bool {
        self.has_tag(address, Tag::False)
    }

    pub fn is_true(&self, address: Address) -> bool {
        self.has_tag(address, Tag::True)
    }

    pub fn is_boolean(&self, address: Address) -> bool {
        self.is_true(address) || self.is_false(address)
    }

    pub fn is_null(&self, address: Address) -> bool {
        self.has_tag(address, Tag::Null)
    }

    pub fn is_unassigned(&self, address: Address) -> bool {
        self.has_tag(address, Tag::Unassigned)
    }

    pub fn is_undefined(&self, address: Address) -> bool {
        self.has_tag(address, Tag::Undefined)
    }

    pub fn is_number(&self, address: Address) -> bool {
        self.has_tag(address, Tag::Number)
    }

    pub fn is_string(&self, address: Address) -> bool {
        self.has_tag(address, Tag::String)
    }

    pub fn is_closure(&self, address: Address) -> bool {
        self.has_tag(address, Tag::Closure)
    }

    pub fn is_builtin(&self, address: Address) -> bool {
        self.has_tag(address, Tag::Builtin)
    }

    pub fn is_blockframe(&self, address: Address) -> bool {
        self.has_tag(address, Tag::Blockframe)
    }

    pub fn is_callframe(&self, address: Address) -> bool {
        self.has_tag(address, Tag::Callframe)
    }

    pub fn is_reference(&self, address: Address) -> bool {
        self.has_tag(address, Tag::Reference)
    }

    fn singleton(&self, singleton: Singleton) -> Address {
        self.singletons[singleton as usize]
    }

    pub fn true_value(&self) -> Address {
        self.singleton(Singleton::True)
    }

    pub fn false_value(&self) -> Address {
        self.singleton(Singleton::False)
    }

    pub fn boolean(&self, b: bool) -> Address {
        if b { self.true_value() } else { self.false_value() }
    }

    pub fn null(&self) -> Address {
        self.singleton(Singleton::Null)
    }

    pub fn unassigned(&self) -> Address {
        self.singleton(Singleton::Unassigned)
    }

    pub fn undefined(&self) -> Address {
        self.singleton(Singleton::Undefined)
    }

    pub fn allocate_number(&mut self, n: NumberType) -> Result<Address, Error> {
        self.allocate(Node::Number(n))
    }

    pub fn number_value(&self, address: Address) -> Result<NumberType, Error> {
        match *self.node(address)? {
            Node::Number(n) => Ok(n),
            ref other => Err(wrong_tag(address, "number", other)),
        }
    }

    /// Intern `string`, returning the existing node when equal content is already pooled
    pub fn allocate_string(&mut self, string: &str) -> Result<Address, Error> {
        let hash = hash_string(string);
        if let Some(bucket) = self.string_pool.get_mut(&hash)
            && let Some(entry) = bucket.iter_mut().flatten().find(|e| e.string == string)
        {
            entry.refs += 1;
            return Ok(entry.address);
        }

        let bucket = self.string_pool.entry(hash).or_default();
        let index = bucket
            .iter()
            .position(Option::is_none)
            .unwrap_or(bucket.len());
        let index =
            u16::try_from(index).map_err(|_| Error::Runtime("string pool bucket overflow".into()))?;

        let address = self.allocate(Node::String { hash, index })?;
        let entry = PooledString {
            address,
            string: string.to_owned(),
            refs: 1,
        };
        let bucket = self.string_pool.entry(hash).or_default();
        match bucket.get_mut(usize::from(index)) {
            Some(slot) => *slot = Some(entry),
            None => bucket.push(Some(entry)),
        }
        Ok(address)
    }

    pub fn string_value(&self, address: Address) -> Result<&str, Error> {
        let Node::String { hash, index } = *self.node(address)? else {
            return Err(wrong_tag(address, "string", self.node(address)?));
        };
        self.string_pool
            .get(&hash)
            .and_then(|bucket| bucket.get(usize::from(index)))
            .and_then(Option::as_ref)
            .map(|entry| entry.string.as_str())
            .ok_or_else(|| Error::Internal(format!("string {address} is not pooled")))
    }

    pub fn allocate_closure(&mut self, arity: u8, pc: usize, env: Address) -> Result<Address, Error> {
        self.allocate(Node::Closure { arity, pc, env })
    }

    pub fn closure_arity(&self, address: Address) -> Result<u8, Error> {
        match *self.node(address)? {
            Node::Closure { arity, .. } => Ok(arity),
            ref other => Err(wrong_tag(address, "closure", other)),
        }
    }

    pub fn closure_pc(&self, address: Address) -> Result<usize, Error> {
        match *self.node(address)? {
            Node::Closure { pc, .. } => Ok(pc),
            ref other => Err(wrong_tag(address, "closure", other)),
        }
    }

    pub fn closure_environment(&self, address: Address) -> Result<Address, Error> {
        match *self.node(address)? {
            Node::Closure { env, .. } => Ok(env),
            ref other => Err(wrong_tag(address, "closure", other)),
        }
    }

    pub fn allocate_blockframe(&mut self, env: Address) -> Result<Address, Error> {
        self.allocate(Node::Blockframe { env })
    }

    pub fn blockframe_environment(&self, address: Address) -> Result<Address, Error> {
        match *self.node(address)? {
            Node::Blockframe { env } => Ok(env),
            ref other => Err(wrong_tag(address, "block frame", other)),
        }
    }

    pub fn allocate_callframe(&mut self, env: Address, pc: usize) -> Result<Address, Error> {
        self.allocate(Node::Callframe { pc, env })
    }

    pub fn callframe_environment(&self, address: Address) -> Result<Address, Error> {
        match *self.node(address)? {
            Node::Callframe { env, .. } => Ok(env),
            ref other => Err(wrong_tag(address, "call frame", other)),
        }
    }

    pub fn callframe_pc(&self, address: Address) -> Result<usize, Error> {
        match *self.node(address)? {
            Node::Callframe { pc, .. } => Ok(pc),
            ref other => Err(wrong_tag(address, "call frame", other)),
        }
    }

    pub fn allocate_builtin(&mut self, id: u8) -> Result<Address, Error> {
        self.allocate(Node::Builtin { id })
    }

    pub fn builtin_id(&self, address: Address) -> Result<u8, Error> {
        match *self.node(address)? {
            Node::Builtin { id } => Ok(id),
            ref other => Err(wrong_tag(address, "builtin", other)),
        }
    }

    /// A frame of `size` slots, all unassigned
    pub fn allocate_frame(&mut self, size: usize) -> Result<Address, Error> {
        let unassigned = self.unassigned();
        self.allocate(Node::Frame(smallvec![unassigned; size]))
    }

    /// An environment of `number_of_frames` frames, to be filled with `set_child`
    pub fn allocate_environment(&mut self, number_of_frames: usize) -> Result<Address, Error> {
        let unassigned = self.unassigned();
        self.allocate(Node::Environment(smallvec![unassigned; number_of_frames]))
    }

    pub fn allocate_reference(&mut self, frame: Address, slot: usize) -> Result<Address, Error> {
        self.allocate(Node::Reference { frame, slot })
    }

    /// The frame and slot a reference points at
    pub fn reference_target(&self, address: Address) -> Result<(Address, usize), Error> {
        match *self.node(address)? {
            Node::Reference { frame, slot } => Ok((frame, slot)),
            ref other => Err(wrong_tag(address, "reference", other)),
        }
    }

    pub fn number_of_children(&self, address: Address) -> Result<usize, Error> {
        Ok(self.node(address)?.children().len())
    }

    pub fn get_child(&self, address: Address, index: usize) -> Result<Address, Error> {
        self.node(address)?
            .children()
            .get(index)
            .copied()
            .ok_or_else(|| Error::Internal(format!("node {address} has no child {index}")))
    }

    pub fn set_child(&mut self, address: Address, index: usize, value: Address) -> Result<(), Error> {
        let child = self
            .node_mut(address)?
            .children_mut()
            .get_mut(index)
            .ok_or_else(|| Error::Internal(format!("node {address} has no child {index}")))?;
        *child = value;
        Ok(())
    }

    /// A new environment with `frame` appended to the frames of `env`. `env` is unchanged.
    pub fn environment_extend(&mut self, frame: Address, env: Address) -> Result<Address, Error> {
        let Node::Environment(frames) = self.node(env)? else {
            return Err(wrong_tag(env, "environment", self.node(env)?));
        };
        let mut extended = frames.clone();
        extended.push(frame);
        self.allocate(Node::Environment(extended))
    }

    pub fn get_environment_value(&self, env: Address, position: Position) -> Result<Address, Error> {
        let frame = self.get_child(env, position.frame)?;
        self.get_child(frame, position.slot)
    }

    pub fn set_environment_value(
        &mut self,
        env: Address,
        position: Position,
        value: Address,
    ) -> Result<(), Error> {
        let frame = self.get_child(env, position.frame)?;
        self.set_child(frame, position.slot, value)
    }

    /// Frame 0 of the base environment: one builtin node per registered builtin
    pub fn allocate_builtin_frame(&mut self, ops: &[BuiltinOp]) -> Result<Address, Error> {
        let frame = self.allocate_frame(ops.len())?;
        for (slot, op) in ops.iter().enumerate() {
            let builtin = self.allocate_builtin(op.id)?;
            self.set_child(frame, slot, builtin)?;
        }
        Ok(frame)
    }

    /// Frame 1 of the base environment: the constant values
    pub fn allocate_constant_frame(&mut self, constants: &[Constant]) -> Result<Address, Error> {
        let frame = self.allocate_frame(constants.len())?;
        for (slot, constant) in constants.iter().enumerate() {
            let value = self.value_to_address(&constant.value)?;
            self.set_child(frame, slot, value)?;
        }
        Ok(frame)
    }

    /// Box a native value. Only literal kinds can be boxed.
    pub fn value_to_address(&mut self, value: &Value) -> Result<Address, Error> {
        match value {
            Value::Bool(b) => Ok(self.boolean(*b)),
            Value::Number(n) => self.allocate_number(*n),
            Value::String(s) => self.allocate_string(s),
            Value::Undefined => Ok(self.undefined()),
            Value::Null => Ok(self.null()),
            Value::Unassigned => Ok(self.unassigned()),
            other => Err(Error::Internal(format!(
                "cannot place {other} on the heap as a literal"
            ))),
        }
    }

    /// Read a node back as a native value. References read as the value they point at.
    pub fn address_to_value(&self, address: Address) -> Result<Value, Error> {
        Ok(match self.node(address)? {
            Node::Singleton(Singleton::False) => Value::Bool(false),
            Node::Singleton(Singleton::True) => Value::Bool(true),
            Node::Singleton(Singleton::Null) => Value::Null,
            Node::Singleton(Singleton::Unassigned) => Value::Unassigned,
            Node::Singleton(Singleton::Undefined) => Value::Undefined,
            Node::Number(n) => Value::Number(*n),
            Node::String { .. } => Value::String(self.string_value(address)?.to_owned()),
            Node::Closure { .. } => Value::Closure,
            Node::Builtin { .. } => Value::Builtin,
            Node::Blockframe { .. } => Value::Blockframe,
            Node::Callframe { .. } => Value::Callframe,
            Node::Reference { frame, slot } => {
                let target = self.get_child(*frame, *slot)?;
                return self.address_to_value(target);
            }
            other @ (Node::Free { .. } | Node::Frame(_) | Node::Environment(_)) => {
                return Err(wrong_tag(address, "value", other));
            }
        })
    }
}

fn wrong_tag(address: Address, expected: &str, found: &Node) -> Error {
    Error::Internal(format!(
        "expected {expected} at {address}, found {:?}",
        found.tag()
    ))
}
