
use std::ops;
use std::fmt;
use std::rc::Rc;

use once_cell::unsync::OnceCell;

use crate::utility::*;
use crate::term::Term;

#[derive(Debug, Clone)]
pub struct EnvEntry {
    pub name: Symbol,
    pub value: LazyValue,
}

impl EnvEntry {
    pub fn new(name: Symbol, value: LazyValue) -> EnvEntry {
        EnvEntry { name, value }
    }
}

impl fmt::Display for EnvEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}; {})", self.name, self.value)
    }
}

/// Whether an environment entry was introduced by a binder or by a
/// definition (`let`). Inserted metas are applied only to bound entries.
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EnvBound {
    Defined,
    Bound
}

#[derive(Debug, Clone, Default)]
pub struct Env(imbl::Vector<EnvEntry>);

impl Env {
    pub fn new() -> Env {
        Env(imbl::Vector::new())
    }
}

impl ops::Deref for Env {
    type Target = imbl::Vector<EnvEntry>;
    fn deref(&self) -> &Self::Target { &self.0 }
}

impl ops::DerefMut for Env {
    fn deref_mut(&mut self) -> &mut Self::Target { &mut self.0 }
}

impl ops::Index<Level> for Env {
    type Output = EnvEntry;

    fn index(&self, index: Level) -> &Self::Output {
        &self.0[*index]
    }
}

impl fmt::Display for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for i in 0..self.len() {
            write!(f, "{}", self[Level::from(i)])?;
            if i + 1 != self.len() { write!(f, ",")?; }
        }
        write!(f, "]")
    }
}

#[derive(Debug, Clone)]
pub struct SpineEntry {
    pub icit: Icit,
    pub value: LazyValue,
}

impl SpineEntry {
    pub fn new(icit: Icit, value: LazyValue) -> SpineEntry {
        SpineEntry { icit, value }
    }
}

impl fmt::Display for SpineEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.icit {
            Icit::Explicit => write!(f, "{}", self.value),
            Icit::Implicit => write!(f, "{{{}}}", self.value),
        }
    }
}

/// The ordered eliminators stacked on a neutral head, outermost first.
#[derive(Debug, Clone, Default)]
pub struct Spine(imbl::Vector<SpineEntry>);

impl Spine {
    pub fn new() -> Spine {
        Spine(imbl::Vector::new())
    }
}

impl ops::Deref for Spine {
    type Target = imbl::Vector<SpineEntry>;
    fn deref(&self) -> &Self::Target { &self.0 }
}

impl ops::DerefMut for Spine {
    fn deref_mut(&mut self) -> &mut Self::Target { &mut self.0 }
}

impl FromIterator<SpineEntry> for Spine {
    fn from_iter<T: IntoIterator<Item = SpineEntry>>(iter: T) -> Self {
        Spine(imbl::Vector::from_iter(iter))
    }
}

impl fmt::Display for Spine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.iter().enumerate() {
            if i > 0 { write!(f, " ")?; }
            write!(f, "{}", entry)?;
        }
        Ok(())
    }
}

/// A suspended term closed over its environment. Binder bodies are kept as
/// closures and only entered by application to an argument value.
#[derive(Debug, Clone)]
pub struct Closure {
    pub env: Env,
    pub code: Term
}

impl Closure {
    pub fn new(env: Env, code: Term) -> Closure {
        Closure { env, code }
    }
}

impl fmt::Display for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{};{}>", self.env, self.code)
    }
}

#[derive(Debug)]
enum LazyCode {
    Suspended { env: Env, code: Term },
    Done
}

/// A value that is computed at most once. Top-level definitions store one
/// of these as their unfolding; forcing is memoized through the cell so
/// sharing of the unfolded form is preserved across every use site.
#[derive(Debug)]
pub struct LazyValueData {
    pub(crate) value: OnceCell<Value>,
    pub(crate) code: std::cell::RefCell<LazyCode>,
}

pub type LazyValue = Rc<LazyValueData>;

impl LazyValueData {
    pub fn lazy(env: Env, code: Term) -> LazyValue {
        LazyValueData {
            value: OnceCell::new(),
            code: std::cell::RefCell::new(LazyCode::Suspended { env, code })
        }.rced()
    }

    pub fn computed(value: Value) -> LazyValue {
        LazyValueData {
            value: OnceCell::from(value),
            code: std::cell::RefCell::new(LazyCode::Done)
        }.rced()
    }

    pub(crate) fn take_code(&self) -> Option<(Env, Term)> {
        let mut slot = self.code.borrow_mut();
        match std::mem::replace(&mut *slot, LazyCode::Done) {
            LazyCode::Suspended { env, code } => Some((env, code)),
            LazyCode::Done => None
        }
    }
}

impl fmt::Display for LazyValueData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value.get() {
            Some(value) => write!(f, "{}", value),
            None => write!(f, "<..>")
        }
    }
}

pub type Value = Rc<ValueData>;

/// Weak-head values. Neutral heads carry their spines; a `Reference` is
/// glued: it shows its folded form while `unfolded` holds the lazily
/// memoized definition for the checks that need to reduce.
#[derive(Debug, Clone)]
pub enum ValueData {
    /// Rigid neutral: a bound variable, by level.
    Variable {
        level: Level,
        spine: Spine
    },
    /// Flexible neutral: an unsolved metavariable head.
    MetaVariable {
        meta: MetaVar,
        spine: Spine
    },
    /// Glued top-level reference. `unfolded` is absent for postulates,
    /// which stay rigid heads forever.
    Reference {
        id: TopId,
        name: Symbol,
        spine: Spine,
        unfolded: Option<LazyValue>
    },
    Lambda {
        icit: Icit,
        name: Symbol,
        closure: Closure
    },
    Pi {
        icit: Icit,
        name: Symbol,
        domain: Value,
        closure: Closure
    },
    Star,
}

impl ValueData {
    pub fn variable(level: impl Into<Level>) -> Value {
        ValueData::variable_with_spine(level, Spine::new())
    }

    pub fn variable_with_spine(level: impl Into<Level>, spine: Spine) -> Value {
        ValueData::Variable { level: level.into(), spine }.rced()
    }

    pub fn meta(meta: MetaVar, spine: Spine) -> Value {
        ValueData::MetaVariable { meta, spine }.rced()
    }

    pub fn reference(id: TopId, name: Symbol, spine: Spine, unfolded: Option<LazyValue>) -> Value {
        ValueData::Reference { id, name, spine, unfolded }.rced()
    }

    pub fn lambda(icit: Icit, name: Symbol, closure: Closure) -> Value {
        ValueData::Lambda { icit, name, closure }.rced()
    }

    pub fn pi(icit: Icit, name: Symbol, domain: Value, closure: Closure) -> Value {
        ValueData::Pi { icit, name, domain, closure }.rced()
    }

    pub fn star() -> Value {
        ValueData::Star.rced()
    }
}

impl fmt::Display for ValueData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueData::Variable { level, spine } => {
                if spine.is_empty() { write!(f, "%{}", level) }
                else { write!(f, "%{} {}", level, spine) }
            }
            ValueData::MetaVariable { meta, spine } => {
                if spine.is_empty() { write!(f, "{}", meta) }
                else { write!(f, "{} {}", meta, spine) }
            }
            ValueData::Reference { name, spine, .. } => {
                if spine.is_empty() { write!(f, "{}", name) }
                else { write!(f, "{} {}", name, spine) }
            }
            ValueData::Lambda { icit, name, closure } => {
                match icit {
                    Icit::Explicit => write!(f, "λ {}. {}", name, closure),
                    Icit::Implicit => write!(f, "λ {{{}}}. {}", name, closure),
                }
            }
            ValueData::Pi { icit, name, domain, closure } => {
                match icit {
                    Icit::Explicit => write!(f, "({} : {}) → {}", name, domain, closure),
                    Icit::Implicit => write!(f, "{{{} : {}}} → {}", name, domain, closure),
                }
            }
            ValueData::Star => write!(f, "U"),
        }
    }
}
