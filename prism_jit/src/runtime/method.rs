//! Runtime handles for classes and methods.
//!
//! The profiler never owns managed objects. It refers to classes through
//! [`ClassRef`] handles, which the collector may invalidate, and to methods
//! through [`MethodInfo`] descriptors supplied by the runtime.

use prism_bytecode::CodeItem;
use rustc_hash::FxHashMap;
use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::warn;

// =============================================================================
// Handles
// =============================================================================

/// Handle to a class in the managed heap.
///
/// The raw value 0 is reserved for "no class" so that an empty slot fits in
/// the same word as a handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassRef(NonZeroU32);

impl ClassRef {
    /// Wrap a raw handle. Returns `None` for 0.
    #[inline]
    pub const fn new(raw: u32) -> Option<Self> {
        match NonZeroU32::new(raw) {
            Some(raw) => Some(ClassRef(raw)),
            None => None,
        }
    }

    /// Raw handle value, never 0.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Debug for ClassRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class@{}", self.0)
    }
}

/// Identifier of a method known to the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(pub u32);

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "method#{}", self.0)
    }
}

// =============================================================================
// Method Descriptor
// =============================================================================

bitflags::bitflags! {
    /// Access and origin flags of a method.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct MethodFlags: u32 {
        /// Implemented in native code; has no bytecode.
        const NATIVE = 1 << 0;
        /// Declared without a body.
        const ABSTRACT = 1 << 1;
        /// Synthesized by copying a default interface method into a class.
        const COPIED = 1 << 2;
        /// Generated proxy method.
        const PROXY = 1 << 3;
    }
}

/// What the profiler needs to know about a method.
#[derive(Debug, Clone)]
pub struct MethodInfo {
    id: MethodId,
    declaring_class: ClassRef,
    flags: MethodFlags,
    code: Option<Arc<CodeItem>>,
}

impl MethodInfo {
    /// Describe a method with a bytecode body.
    pub fn new(id: MethodId, declaring_class: ClassRef, code: Arc<CodeItem>) -> Self {
        Self {
            id,
            declaring_class,
            flags: MethodFlags::empty(),
            code: Some(code),
        }
    }

    /// Describe a method without bytecode (native or abstract).
    pub fn without_code(id: MethodId, declaring_class: ClassRef, flags: MethodFlags) -> Self {
        Self {
            id,
            declaring_class,
            flags,
            code: None,
        }
    }

    /// Set method flags.
    pub fn with_flags(mut self, flags: MethodFlags) -> Self {
        self.flags = flags;
        self
    }

    #[inline]
    pub fn id(&self) -> MethodId {
        self.id
    }

    #[inline]
    pub fn declaring_class(&self) -> ClassRef {
        self.declaring_class
    }

    #[inline]
    pub fn flags(&self) -> MethodFlags {
        self.flags
    }

    /// Bytecode body, if the method has one.
    #[inline]
    pub fn code(&self) -> Option<&Arc<CodeItem>> {
        self.code.as_ref()
    }

    /// Whether this method was copied into a class other than its declaring
    /// interface.
    #[inline]
    pub fn is_copied(&self) -> bool {
        self.flags.contains(MethodFlags::COPIED)
    }

    /// Class the collector must rescan when profiling data for this method
    /// changes.
    ///
    /// For copied methods this is the class holding the copy, which only the
    /// runtime knows; every other method is held by its declaring class.
    /// Returns `None` for a copied method the resolver cannot place.
    pub fn holding_class<R: ClassResolver + ?Sized>(&self, resolver: &R) -> Option<ClassRef> {
        if !self.is_copied() {
            return Some(self.declaring_class);
        }
        let holder = resolver.holding_class_of_copied_method(self);
        if holder.is_none() {
            warn!(method = %self.id, "no holding class registered for copied method");
        }
        holder
    }
}

// =============================================================================
// Class Resolution
// =============================================================================

/// Runtime context for class lookups the profiler cannot do on its own.
pub trait ClassResolver {
    /// Class that holds the copy of a copied method.
    fn holding_class_of_copied_method(&self, method: &MethodInfo) -> Option<ClassRef>;
}

/// Resolver backed by an explicit table of copied methods.
#[derive(Debug, Default, Clone)]
pub struct CopiedMethodTable {
    holders: FxHashMap<MethodId, ClassRef>,
}

impl CopiedMethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `method` was copied into `holder`.
    pub fn register(&mut self, method: MethodId, holder: ClassRef) {
        self.holders.insert(method, holder);
    }
}

impl ClassResolver for CopiedMethodTable {
    fn holding_class_of_copied_method(&self, method: &MethodInfo) -> Option<ClassRef> {
        self.holders.get(&method.id()).copied()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn class(raw: u32) -> ClassRef {
        ClassRef::new(raw).unwrap()
    }

    #[test]
    fn test_class_ref_rejects_zero() {
        assert!(ClassRef::new(0).is_none());
        assert_eq!(class(7).raw(), 7);
    }

    #[test]
    fn test_holding_class_of_regular_method() {
        let code = Arc::new(CodeItem::from_insns(1, vec![0x000e]));
        let method = MethodInfo::new(MethodId(1), class(10), code);
        assert_eq!(method.holding_class(&CopiedMethodTable::new()), Some(class(10)));
    }

    #[test]
    fn test_holding_class_of_copied_method() {
        let code = Arc::new(CodeItem::from_insns(1, vec![0x000e]));
        let method = MethodInfo::new(MethodId(2), class(10), code).with_flags(MethodFlags::COPIED);

        let mut table = CopiedMethodTable::new();
        table.register(MethodId(2), class(33));
        assert_eq!(method.holding_class(&table), Some(class(33)));
    }

    #[test]
    fn test_unregistered_copied_method_has_no_holder() {
        let method = MethodInfo::without_code(MethodId(3), class(10), MethodFlags::COPIED);
        assert_eq!(method.holding_class(&CopiedMethodTable::new()), None);
        assert!(method.code().is_none());
    }
}
