//! Preprocessor dictionaries.
//!
//! A dictionary maps token text to a [`Word`]: either a built-in directive
//! or a user definition. Lookup goes through the innermost local dictionary
//! first, then the global one, so `#ldef` bindings shadow everything while
//! they are in scope.

use indexmap::IndexMap;
use sabr_lexer::Token;

/// Passes all directives as a sequence of `Name = "#text",` into the
/// provided macro.
#[macro_export]
macro_rules! expand_directives {
    ($x:path) => {
        $x! {
            Def = "#def",
            Macro = "#macro",
            Isdef = "#isdef",
            Undef = "#undef",
            Getdef = "#getdef",
            LDef = "#ldef",
            LMacro = "#lmacro",
            LIsdef = "#lisdef",
            LUndef = "#lundef",
            LGetdef = "#lgetdef",

            Import = "#import",
            Include = "#include",

            Eval = "#eval",
            If = "#if",

            Break = "#break",
            Continue = "#continue",

            Concat = "#concat",
            Substr = "#substr",
            Compare = "#compare",
            Len = "#len",

            Drop = "#drop",
            Nip = "#nip",
            Dup = "#dup",
            Over = "#over",
            Tuck = "#tuck",
            Swap = "#swap",
            Rot = "#rot",
            TwoDrop = "#2drop",
            TwoNip = "#2nip",
            TwoDup = "#2dup",
            TwoOver = "#2over",
            TwoTuck = "#2tuck",
            TwoSwap = "#2swap",
            TwoRot = "#2rot",

            Add = "#+",
            Sub = "#-",
            Mul = "#*",
            Div = "#/",
            Mod = "#%",
            Udiv = "#u/",
            Umod = "#u%",

            Equ = "#=",
            Neq = "#!=",
            Lst = "#<",
            Leq = "#<=",
            Grt = "#>",
            Geq = "#>=",
            Ulst = "#u<",
            Uleq = "#u<=",
            Ugrt = "#u>",
            Ugeq = "#u>=",

            Fadd = "#f+",
            Fsub = "#f-",
            Fmul = "#f*",
            Fdiv = "#f/",
            Fmod = "#f%",
            Flst = "#f<",
            Fleq = "#f<=",
            Fgrt = "#f>",
            Fgeq = "#f>=",

            Band = "#&",
            Bor = "#|",
            Bxor = "#^",
            Bnot = "#~",
            Blsft = "#<<",
            Brsft = "#>>",

            Ftoi = "#ftoi",
            Itof = "#itof",

            Fmti = "#fmti",
            Fmtu = "#fmtu",
            Fmtf = "#fmtf",
        }
    };
}

macro_rules! directive_enum {
    ($($name:tt = $text:tt),* $(,)?) => {
        /// A built-in preprocessor directive.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum Directive {
            $($name),*
        }

        impl Directive {
            /// Every directive paired with its source spelling, in
            /// dictionary insertion order.
            pub const ALL: &'static [(&'static str, Directive)] = &[
                $(($text, Directive::$name)),*
            ];

            pub fn text(self) -> &'static str {
                match self {
                    $(Self::$name => $text),*
                }
            }
        }
    }
}

expand_directives!(directive_enum);

/// A user `#def`/`#macro` binding. The body is stored as its raw token and
/// re-tokenized on every expansion, which is what makes recursive
/// definitions possible without any cyclic structure in the dictionary.
#[derive(Debug, Clone)]
pub struct Definition {
    pub body: Token,
    /// True for `#def`/`#ldef`: expansion introduces a fresh local scope.
    /// `#macro`/`#lmacro` expand in the caller's scope.
    pub is_func: bool,
}

/// A dictionary entry.
#[derive(Debug, Clone)]
pub enum Word {
    Directive(Directive),
    Def(Definition),
}

pub type Dictionary = IndexMap<String, Word>;

/// The global dictionary pre-seeded with every built-in directive.
pub fn global_dictionary() -> Dictionary {
    Directive::ALL
        .iter()
        .map(|&(text, directive)| (text.to_owned(), Word::Directive(directive)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_seeded() {
        let dictionary = global_dictionary();
        assert!(matches!(
            dictionary.get("#def"),
            Some(Word::Directive(Directive::Def))
        ));
        assert!(matches!(
            dictionary.get("#2swap"),
            Some(Word::Directive(Directive::TwoSwap))
        ));
        assert!(dictionary.get("dup").is_none());
    }
}
