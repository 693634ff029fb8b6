//! Case paths: an accessor table for one variant of an enum.

use std::fmt;

/// Embeds a `Value` into a `Root` enum and extracts it back out.
///
/// Usually built with [`case_path!`](crate::case_path) for a tuple variant
/// holding a single value.
pub struct CasePath<Root, Value> {
    embed: fn(Value) -> Root,
    extract: fn(Root) -> Result<Value, Root>,
}

impl<Root, Value> CasePath<Root, Value> {
    pub const fn new(embed: fn(Value) -> Root, extract: fn(Root) -> Result<Value, Root>) -> Self {
        Self { embed, extract }
    }

    pub fn embed(&self, value: Value) -> Root {
        (self.embed)(value)
    }

    /// The wrapped value, or the root back if it is a different variant.
    pub fn extract(&self, root: Root) -> Result<Value, Root> {
        (self.extract)(root)
    }

    /// The embedding as a plain function pointer.
    pub fn embedder(&self) -> fn(Value) -> Root {
        self.embed
    }
}

impl<Root, Value> Clone for CasePath<Root, Value> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Root, Value> Copy for CasePath<Root, Value> {}

impl<Root, Value> fmt::Debug for CasePath<Root, Value> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CasePath<{}, {}>",
            std::any::type_name::<Root>(),
            std::any::type_name::<Value>()
        )
    }
}

/// Builds a [`CasePath`](crate::reducer::CasePath) for a single-field tuple
/// variant: `case_path!(AppAction::Counter)`.
#[macro_export]
macro_rules! case_path {
    ($root:ident :: $variant:ident) => {
        $crate::reducer::CasePath::new($root::$variant, |root| match root {
            $root::$variant(value) => ::core::result::Result::Ok(value),
            #[allow(unreachable_patterns)]
            other => ::core::result::Result::Err(other),
        })
    };
}
