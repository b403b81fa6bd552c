
use std::fmt;
use std::rc::Rc;

use imbl::Vector;

use crate::utility::*;
use crate::value::EnvBound;

/// Byte span in the originating source text.
pub type Span = (usize, usize);

pub type Term = Rc<TermData>;

/// Core syntax, the output of elaboration. Variables are De Bruijn
/// indices; top-level references and metavariables are numeric ids.
#[derive(Debug, Hash, Clone, PartialEq, Eq)]
pub enum TermData {
    Bound {
        index: Index
    },
    Top {
        id: TopId,
        name: Symbol
    },
    Meta {
        meta: MetaVar
    },
    /// A metavariable freshly created by the elaborator, applied to the
    /// bound variables of its creation scope. The mask records which
    /// entries of the local environment were bound rather than defined.
    InsertedMeta {
        meta: MetaVar,
        mask: Vec<EnvBound>
    },
    Apply {
        icit: Icit,
        fun: Term,
        arg: Term
    },
    Lambda {
        icit: Icit,
        name: Symbol,
        body: Term
    },
    Pi {
        icit: Icit,
        name: Symbol,
        domain: Term,
        body: Term
    },
    Let {
        name: Symbol,
        anno: Term,
        def: Term,
        body: Term
    },
    Star,
}

impl TermData {
    pub fn ambiguous(&self) -> bool {
        match self {
            TermData::Lambda { .. }
            | TermData::Pi { .. }
            | TermData::Let { .. }
            | TermData::Apply { .. } => true,
            TermData::Bound { .. }
            | TermData::Top { .. }
            | TermData::Meta { .. }
            | TermData::InsertedMeta { .. }
            | TermData::Star => false,
        }
    }

    pub fn is_apply(&self) -> bool { matches!(self, TermData::Apply { .. }) }

    pub fn to_string_with_context(&self, mut ctx: Vector<Symbol>) -> String {
        match self {
            TermData::Lambda { icit, name, body } => {
                ctx.push_back(*name);
                let body = body.to_string_with_context(ctx);
                match icit {
                    Icit::Explicit => format!("λ {}. {}", name, body),
                    Icit::Implicit => format!("λ {{{}}}. {}", name, body),
                }
            }
            TermData::Pi { icit, name, domain, body } => {
                let domain_str = domain.to_string_with_context(ctx.clone());
                ctx.push_back(*name);
                let body = body.to_string_with_context(ctx);
                match icit {
                    Icit::Explicit if name.as_str() == "_" && !domain.ambiguous() =>
                        format!("{} → {}", domain_str, body),
                    Icit::Explicit if name.as_str() == "_" =>
                        format!("({}) → {}", domain_str, body),
                    Icit::Explicit => format!("({} : {}) → {}", name, domain_str, body),
                    Icit::Implicit => format!("{{{} : {}}} → {}", name, domain_str, body),
                }
            }
            TermData::Let { name, anno, def, body } => {
                let anno = anno.to_string_with_context(ctx.clone());
                let def = def.to_string_with_context(ctx.clone());
                ctx.push_back(*name);
                let body = body.to_string_with_context(ctx);
                format!("let {} : {} = {}; {}", name, anno, def, body)
            }
            TermData::Apply { icit, fun, arg } => {
                let fun_str = fun.to_string_with_context(ctx.clone());
                let arg_str = arg.to_string_with_context(ctx);
                let fun_str = if fun.is_apply() || !fun.ambiguous() { fun_str }
                    else { format!("({})", fun_str) };
                match icit {
                    Icit::Explicit if arg.ambiguous() => format!("{} ({})", fun_str, arg_str),
                    Icit::Explicit => format!("{} {}", fun_str, arg_str),
                    Icit::Implicit => format!("{} {{{}}}", fun_str, arg_str),
                }
            }
            TermData::Bound { index } => {
                let mut result = format!("@{}", **index);
                if ctx.len() > **index {
                    let level = index.to_level(ctx.len());
                    if let Some(var) = ctx.get(*level) {
                        result = var.to_string()
                    }
                }
                result
            }
            TermData::Top { name, .. } => name.to_string(),
            TermData::Meta { meta } => meta.to_string(),
            TermData::InsertedMeta { meta, mask } => {
                let mut args = String::new();
                for (i, entry) in mask.iter().enumerate() {
                    if *entry == EnvBound::Bound {
                        args.push(' ');
                        let name = ctx.get(i).cloned().unwrap_or_default();
                        args.push_str(name.as_str());
                    }
                }
                if args.is_empty() { meta.to_string() }
                else { format!("({}{})", meta, args) }
            }
            TermData::Star => "U".to_string(),
        }
    }
}

impl fmt::Display for TermData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_with_context(Vector::new()))
    }
}
