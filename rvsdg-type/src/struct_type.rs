use std::{fmt, sync::Arc};

use smallvec::SmallVec;

use crate::Type;

/// The layout-defining part of a struct type.
///
/// Declarations are shared between all struct types referring to the same
/// definition, which lets recursive struct types (a struct containing a
/// pointer to itself) be represented without cycles in the type graph:
/// the pointer element is opaque, and the declaration is reached by handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructDeclaration {
    elements: SmallVec<[Type; 4]>,
    packed: bool,
    name: Option<String>,
}

impl StructDeclaration {
    pub fn new(elements: impl IntoIterator<Item = Type>) -> Self {
        Self {
            elements: SmallVec::from_iter(elements),
            packed: false,
            name: None,
        }
    }

    pub fn with_packed(mut self, packed: bool) -> Self {
        self.packed = packed;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[inline]
    pub fn elements(&self) -> &[Type] {
        &self.elements
    }

    #[inline]
    pub fn is_packed(&self) -> bool {
        self.packed
    }

    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// A compound type of fixed shape, referring to a shared [StructDeclaration]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructType {
    declaration: Arc<StructDeclaration>,
    packed: bool,
}

impl StructType {
    pub fn new(declaration: Arc<StructDeclaration>, packed: bool) -> Self {
        Self { declaration, packed }
    }

    #[inline]
    pub fn declaration(&self) -> &StructDeclaration {
        &self.declaration
    }

    #[inline]
    pub fn is_packed(&self) -> bool {
        self.packed || self.declaration.is_packed()
    }

    /// The number of fields in this struct
    #[inline]
    pub fn num_fields(&self) -> usize {
        self.declaration.elements().len()
    }

    /// The type of the field at `index`, if in bounds
    #[inline]
    pub fn field(&self, index: usize) -> Option<&Type> {
        self.declaration.elements().get(index)
    }
}

impl fmt::Display for StructType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(name) = self.declaration.name() {
            return write!(f, "%{name}");
        }
        if self.is_packed() {
            f.write_str("<")?;
        }
        f.write_str("{")?;
        for (i, field) in self.declaration.elements().iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{field}")?;
        }
        f.write_str("}")?;
        if self.is_packed() {
            f.write_str(">")?;
        }
        Ok(())
    }
}
