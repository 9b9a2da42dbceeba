//! Template instantiation.
//!
//! A template is an ordered list of triples whose items name elements by
//! variable, by type, or by fixed address. Loading a template materializes
//! the pattern: unresolved typed items become fresh nodes, links or
//! connectors, and every resolved item is appended as a member of a new
//! structure node that the loader returns.
//!
//! Each named variable resolves at most once per load; bindings supplied
//! through the parameter map take effect before any element is created.

use std::collections::HashMap;

use tracing::debug;

use crate::context::MemoryContext;
use crate::error::{Result, StoreError};
use crate::storage::Storage;
use crate::types::{Addr, ElementType};

/// One slot of a triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateItem {
    /// A variable with a fixed type, resolved at most once per load.
    Named { name: String, ty: ElementType },
    /// An anonymous element of the given type, created per occurrence.
    Typed(ElementType),
    /// An existing element.
    Fixed(Addr),
}

impl TemplateItem {
    pub fn named(name: impl Into<String>, ty: ElementType) -> Self {
        Self::Named { name: name.into(), ty }
    }

    pub fn typed(ty: ElementType) -> Self {
        Self::Typed(ty)
    }

    pub fn fixed(addr: Addr) -> Self {
        Self::Fixed(addr)
    }

    fn name(&self) -> Option<&str> {
        match self {
            Self::Named { name, .. } => Some(name),
            _ => None,
        }
    }

    fn ty(&self) -> Option<ElementType> {
        match self {
            Self::Named { ty, .. } | Self::Typed(ty) => Some(*ty),
            Self::Fixed(_) => None,
        }
    }
}

/// An ordered `(source, connector, target)` pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Triple {
    pub source: TemplateItem,
    pub connector: TemplateItem,
    pub target: TemplateItem,
}

/// A pattern of triples to materialize.
#[derive(Debug, Clone, Default)]
pub struct Template {
    triples: Vec<Triple>,
}

impl Template {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one triple; builder style.
    pub fn triple(
        mut self,
        source: TemplateItem,
        connector: TemplateItem,
        target: TemplateItem,
    ) -> Self {
        self.triples.push(Triple { source, connector, target });
        self
    }

    pub fn triples(&self) -> &[Triple] {
        &self.triples
    }
}

/// Pre-bound addresses for named variables.
pub type TemplateParams = HashMap<String, Addr>;

/// Walks a template and materializes it into graph elements.
pub struct TemplateLoader<'a> {
    storage: &'a Storage,
    ctx: &'a MemoryContext,
}

/// Membership connector used to gather produced elements under the result
/// structure.
const MEMBER_ARC: ElementType = ElementType::ARC_ACCESS
    .union(ElementType::CONST)
    .union(ElementType::POS)
    .union(ElementType::PERM);

impl<'a> TemplateLoader<'a> {
    pub fn new(storage: &'a Storage, ctx: &'a MemoryContext) -> Self {
        Self { storage, ctx }
    }

    /// Materializes `template`, resolving triples in order (source, target,
    /// then connector) and returns the structure gathering every member.
    pub fn load(&self, template: &Template, params: &TemplateParams) -> Result<Addr> {
        let structure = self
            .storage
            .node_new(self.ctx, ElementType::CONST | ElementType::STRUCT);
        if structure.is_empty() {
            return Err(StoreError::Full);
        }

        let mut resolved: HashMap<String, Addr> = HashMap::new();
        for triple in template.triples() {
            let source = self.resolve(&triple.source, None, None, params, &mut resolved, structure)?;
            let target = self.resolve(&triple.target, None, None, params, &mut resolved, structure)?;
            self.resolve(
                &triple.connector,
                Some(source),
                Some(target),
                params,
                &mut resolved,
                structure,
            )?;
        }
        debug!(%structure, triples = template.triples().len(), "template.load");
        Ok(structure)
    }

    fn resolve(
        &self,
        item: &TemplateItem,
        source: Option<Addr>,
        target: Option<Addr>,
        params: &TemplateParams,
        resolved: &mut HashMap<String, Addr>,
        structure: Addr,
    ) -> Result<Addr> {
        let mut addr = Addr::EMPTY;
        if let Some(name) = item.name() {
            if let Some(bound) = params.get(name) {
                addr = *bound;
            }
            if let Some(local) = resolved.get(name) {
                addr = *local;
            }
        }

        if addr.is_not_empty() {
            self.check_kind(item, addr)?;
        } else {
            addr = match item {
                TemplateItem::Fixed(fixed) => {
                    if !self.storage.is_element(self.ctx, *fixed) {
                        return Err(StoreError::InvalidAddr);
                    }
                    *fixed
                }
                TemplateItem::Named { ty, .. } | TemplateItem::Typed(ty) => {
                    self.create(*ty, source, target)?
                }
            };
            if let Some(name) = item.name() {
                resolved.insert(name.to_string(), addr);
            }
        }

        // Every resolved item becomes a structure member, one per mention.
        let member = self.storage.arc_new(self.ctx, MEMBER_ARC, structure, addr);
        if member.is_empty() {
            return Err(StoreError::Full);
        }
        Ok(addr)
    }

    fn create(
        &self,
        ty: ElementType,
        source: Option<Addr>,
        target: Option<Addr>,
    ) -> Result<Addr> {
        let addr = match (source, target) {
            (Some(source), Some(target)) => self.storage.arc_new(self.ctx, ty, source, target),
            _ if ty.is_arc() => {
                return Err(StoreError::InvalidType(
                    "connector item used without endpoints",
                ));
            }
            _ if ty.is_link() => self.storage.link_new(self.ctx),
            _ => self.storage.node_new(self.ctx, ty.subtype()),
        };
        if addr.is_empty() {
            return Err(StoreError::Full);
        }
        Ok(addr)
    }

    /// A bound variable must match its declared element kind.
    fn check_kind(&self, item: &TemplateItem, addr: Addr) -> Result<()> {
        let Some(ty) = item.ty() else { return Ok(()) };
        if ty.kind().is_empty() {
            return Ok(());
        }
        let actual = self.storage.get_element_type(self.ctx, addr)?;
        if actual.kind().intersects(ty.kind()) {
            Ok(())
        } else {
            Err(StoreError::InvalidType(
                "bound variable has an incompatible element kind",
            ))
        }
    }
}

impl Storage {
    /// Convenience wrapper over [`TemplateLoader::load`].
    pub fn load_template(
        &self,
        ctx: &MemoryContext,
        template: &Template,
        params: &TemplateParams,
    ) -> Result<Addr> {
        TemplateLoader::new(self, ctx).load(template, params)
    }
}
