//! Lexical scopes and the per-execution cancellation signal.
//!
//! All scopes of one execution live in a shared arena; a [`Scope`] is an index
//! into it and parent links are indices as well. Frames are immutable once
//! pushed, so a scope's bindings and parent never change after creation and
//! concurrent branches can read disjoint lineages freely.

use crate::error::JplError;
use crate::jval::{JVal, Object};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation token shared by every scope of one execution.
///
/// Transitions once from running to exited. The flag is atomic so a host may
/// exit it from another thread; the engine only observes it at its next health
/// check.
#[derive(Debug, Clone, Default)]
pub struct Signal {
    exited: Arc<AtomicBool>,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    pub fn check_health(&self) -> Result<(), JplError> {
        if self.is_exited() {
            return Err(JplError::fatal("execution has been exited"));
        }
        Ok(())
    }

    /// Returns `true` only for the call that performed the transition.
    pub fn exit(&self) -> bool {
        let transitioned = !self.exited.swap(true, Ordering::AcqRel);
        if transitioned {
            tracing::debug!("signal exited");
        }
        transitioned
    }
}

struct Frame {
    parent: Option<usize>,
    vars: Object,
}

struct Arena {
    frames: RefCell<Vec<Frame>>,
    signal: Signal,
}

/// Handle to one node of the scope tree.
#[derive(Clone)]
pub struct Scope {
    arena: Rc<Arena>,
    id: usize,
}

impl Scope {
    /// Root scope of a new tree.
    pub fn new(vars: Object, signal: Signal) -> Self {
        let arena = Arena {
            frames: RefCell::new(vec![Frame { parent: None, vars }]),
            signal,
        };
        Self {
            arena: Rc::new(arena),
            id: 0,
        }
    }

    /// Child scope sharing this scope's tree and signal.
    pub fn child<I>(&self, vars: I) -> Scope
    where
        I: IntoIterator<Item = (String, JVal)>,
    {
        let vars: Object = vars.into_iter().collect();
        let mut frames = self.arena.frames.borrow_mut();
        // A torn-down arena stays empty.
        if frames.is_empty() {
            return self.clone();
        }
        frames.push(Frame {
            parent: Some(self.id),
            vars,
        });
        Scope {
            arena: Rc::clone(&self.arena),
            id: frames.len() - 1,
        }
    }

    pub fn parent(&self) -> Option<Scope> {
        let parent = self.arena.frames.borrow().get(self.id)?.parent?;
        Some(Scope {
            arena: Rc::clone(&self.arena),
            id: parent,
        })
    }

    /// Resolve `name`, innermost binding first.
    pub fn get(&self, name: &str) -> Option<JVal> {
        let frames = self.arena.frames.borrow();
        let mut cursor = Some(self.id);
        while let Some(frame) = cursor.and_then(|id| frames.get(id)) {
            if let Some(value) = frame.vars.get(name) {
                return Some(value.clone());
            }
            cursor = frame.parent;
        }
        None
    }

    /// Every visible binding, inner bindings shadowing outer ones.
    pub fn vars(&self) -> Object {
        let frames = self.arena.frames.borrow();
        let mut lineage = Vec::new();
        let mut cursor = Some(self.id);
        while let Some(frame) = cursor.and_then(|id| frames.get(id)) {
            lineage.push(frame);
            cursor = frame.parent;
        }
        let mut out = Object::new();
        for frame in lineage.into_iter().rev() {
            for (name, value) in &frame.vars {
                out.insert(name.clone(), value.clone());
            }
        }
        out
    }

    pub fn signal(&self) -> &Signal {
        &self.arena.signal
    }

    pub fn same_tree(&self, other: &Scope) -> bool {
        Rc::ptr_eq(&self.arena, &other.arena)
    }

    /// Drop every frame of the tree, including function values that close
    /// over it. Later lookups find nothing.
    pub(crate) fn teardown(&self) {
        let frames = std::mem::take(&mut *self.arena.frames.borrow_mut());
        drop(frames);
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id)
            .field("exited", &self.signal().is_exited())
            .finish()
    }
}
