
use std::fmt;
use std::collections::HashMap;

use crate::utility::*;
use crate::term::{Term, Span};
use crate::value::{Value, LazyValue};
use crate::metavar::MetaEntry;

#[derive(Debug)]
pub enum DatabaseError {
    DeclCollision { name: String }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseError::DeclCollision { name } =>
                write!(f, "the name {} is already declared", name)
        }
    }
}

impl std::error::Error for DatabaseError { }

/// A top-level declaration. Entries are glued: evaluation of a reference
/// to this entry yields a value whose unfolding thunk is `unfolded`, so
/// the definition body is evaluated at most once per entry.
#[derive(Debug, Clone)]
pub struct TopEntry {
    pub name: Symbol,
    pub span: Span,
    pub ty: Value,
    pub ty_term: Term,
    /// Memoized unfolding of the definition. Absent for postulates.
    pub unfolded: Option<LazyValue>,
    pub term: Option<Term>,
}

/// Process-wide elaboration state: the append-only top-level context and
/// the metacontext. Single-writer; the unifier is the only mutator of
/// meta entries, declaration boundaries the only growth points for tops.
#[derive(Debug, Default)]
pub struct Database {
    tops: Vec<TopEntry>,
    top_names: HashMap<Symbol, TopId>,
    metas: Vec<MetaEntry>,
}

impl Database {
    pub fn new() -> Database {
        Database {
            tops: Vec::new(),
            top_names: HashMap::new(),
            metas: Vec::new()
        }
    }

    pub fn insert_top(
        &mut self,
        name: Symbol,
        span: Span,
        ty: Value,
        ty_term: Term,
        def: Option<(LazyValue, Term)>)
        -> Result<TopId, DatabaseError>
    {
        if self.top_names.contains_key(&name) {
            return Err(DatabaseError::DeclCollision { name: name.to_string() })
        }
        let id = TopId::from(self.tops.len());
        let (unfolded, term) = match def {
            Some((unfolded, term)) => (Some(unfolded), Some(term)),
            None => (None, None)
        };
        self.tops.push(TopEntry { name, span, ty, ty_term, unfolded, term });
        self.top_names.insert(name, id);
        Ok(id)
    }

    pub fn lookup_top(&self, name: Symbol) -> Option<TopId> {
        self.top_names.get(&name).copied()
    }

    pub fn top(&self, id: TopId) -> &TopEntry {
        self.tops.get(*id)
            .expect("Impossible, any referenced top-level entry must exist.")
    }

    pub fn lookup_def(&self, id: TopId) -> Option<LazyValue> {
        self.top(id).unfolded.clone()
    }

    pub fn tops(&self) -> impl Iterator<Item = &TopEntry> {
        self.tops.iter()
    }

    pub fn fresh_meta(&mut self, ty: Value, span: Span) -> MetaVar {
        let meta = MetaVar::from(self.metas.len());
        self.metas.push(MetaEntry::Unsolved { ty, span });
        meta
    }

    pub fn lookup_meta(&self, meta: MetaVar) -> &MetaEntry {
        self.metas.get(*meta)
            .expect("Impossible, any created meta must exist.")
    }

    /// Record a solution. Solutions are monotone: solving twice is a bug
    /// in the unifier, not a user error.
    pub fn solve_meta(&mut self, meta: MetaVar, value: Value, term: Term) {
        let entry = self.metas.get_mut(*meta)
            .expect("Impossible, any created meta must exist.");
        match entry {
            MetaEntry::Unsolved { .. } => {
                *entry = MetaEntry::Solved { value, term };
            }
            MetaEntry::Solved { .. } =>
                panic!("Impossible, meta {} solved twice.", meta)
        }
    }

    pub fn meta_count(&self) -> usize {
        self.metas.len()
    }

    /// The metas created at or after `start` that are still unsolved,
    /// with their creation positions. Consulted at declaration close.
    pub fn unsolved_metas_since(&self, start: usize) -> Vec<(MetaVar, Span)> {
        self.metas.iter()
            .enumerate()
            .skip(start)
            .filter_map(|(i, entry)| match entry {
                MetaEntry::Unsolved { span, .. } => Some((MetaVar::from(i), *span)),
                MetaEntry::Solved { .. } => None
            })
            .collect()
    }
}
