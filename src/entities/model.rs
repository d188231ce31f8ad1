//! Entity records committed to and read from the server.

use std::{collections::BTreeMap, fmt};

use crate::{
    error::ClientError,
    zinc::{CommitRecord, Dict, Ref, Value},
};

/// Kind of a Haystack entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// A building or campus.
    Site,
    /// A piece of equipment within a site.
    Equip,
    /// A sensor, command, or setpoint.
    Point,
}

impl EntityKind {
    /// Marker tag identifying the kind.
    #[must_use]
    pub const fn marker(self) -> &'static str {
        match self {
            Self::Site => "site",
            Self::Equip => "equip",
            Self::Point => "point",
        }
    }

    /// Tags every commit grid for this kind must carry as columns.
    #[must_use]
    pub const fn required_tags(self) -> &'static [&'static str] {
        match self {
            Self::Site => &["dis", "tz", "refName", "site"],
            Self::Equip => &["dis", "siteRef", "tz", "refName", "equip"],
            Self::Point => &["dis", "siteRef", "equipRef", "kind", "tz", "refName", "point"],
        }
    }

    fn detect(dict: &Dict) -> Option<Self> {
        [Self::Point, Self::Equip, Self::Site]
            .into_iter()
            .find(|kind| dict.get(kind.marker()).is_some_and(Value::is_marker))
    }
}

/// Value kind of a point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointKind {
    /// Boolean point.
    Bool,
    /// Numeric point.
    Number,
    /// Text point.
    Str,
}

impl fmt::Display for PointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bool => "Bool",
            Self::Number => "Number",
            Self::Str => "Str",
        })
    }
}

/// A site, equipment, or point record.
#[derive(Clone, Debug, PartialEq)]
pub struct Entity {
    kind: EntityKind,
    id: Option<Ref>,
    tags: BTreeMap<String, Value>,
}

impl Entity {
    fn with_base(kind: EntityKind, dis: &str, ref_name: &str, tz: &str) -> Self {
        Self {
            kind,
            id: None,
            tags: BTreeMap::new(),
        }
        .with_tag("dis", dis)
        .with_tag("refName", ref_name)
        .with_tag("tz", tz)
    }

    /// New site record.
    #[must_use]
    pub fn site(dis: &str, ref_name: &str, tz: &str) -> Self {
        Self::with_base(EntityKind::Site, dis, ref_name, tz)
    }

    /// New equipment record under `site_ref`.
    #[must_use]
    pub fn equip(dis: &str, ref_name: &str, site_ref: Ref, tz: &str) -> Self {
        Self::with_base(EntityKind::Equip, dis, ref_name, tz).with_tag("siteRef", site_ref)
    }

    /// New point record under `equip_ref`.
    #[must_use]
    pub fn point(
        dis: &str,
        ref_name: &str,
        site_ref: Ref,
        equip_ref: Ref,
        kind: PointKind,
        tz: &str,
    ) -> Self {
        Self::with_base(EntityKind::Point, dis, ref_name, tz)
            .with_tag("siteRef", site_ref)
            .with_tag("equipRef", equip_ref)
            .with_tag("kind", kind.to_string())
    }

    /// Rebuild a record from a decoded read row.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Decode`] when the row carries none of the
    /// `site`, `equip`, or `point` markers.
    pub fn from_dict(mut dict: Dict) -> Result<Self, ClientError> {
        let kind = EntityKind::detect(&dict)
            .ok_or_else(|| ClientError::Decode("row is not a site, equip, or point".to_owned()))?;
        let id = match dict.remove("id") {
            Some(Value::Ref(r)) => Some(r),
            _ => None,
        };
        dict.remove(kind.marker());
        Ok(Self {
            kind,
            id,
            tags: dict,
        })
    }

    /// Attach the server-assigned identifier.
    #[must_use]
    pub fn with_id(mut self, id: Ref) -> Self {
        self.id = Some(id);
        self
    }

    /// Set a tag. `id` and the kind marker are managed separately and are
    /// ignored here.
    #[must_use]
    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let tag = name.into();
        if tag != "id" && tag != self.kind.marker() {
            self.tags.insert(tag, value.into());
        }
        self
    }

    /// Set a marker tag such as `sensor` or `his`.
    #[must_use]
    pub fn with_marker(self, name: impl Into<String>) -> Self { self.with_tag(name, Value::Marker) }

    /// Entity kind.
    #[must_use]
    pub const fn kind(&self) -> EntityKind { self.kind }

    /// Server identifier, if assigned.
    #[must_use]
    pub const fn id(&self) -> Option<&Ref> { self.id.as_ref() }

    /// Look up a tag value.
    #[must_use]
    pub fn tag(&self, name: &str) -> Option<&Value> { self.tags.get(name) }

    /// Display name, when present as text.
    #[must_use]
    pub fn dis(&self) -> Option<&str> { self.tag("dis").and_then(Value::as_str) }

    /// All tags as they appear on the wire: the user tags, the kind marker,
    /// and `id` when assigned.
    #[must_use]
    pub fn zinc_tags(&self) -> BTreeMap<String, Value> {
        let mut tags = self.tags.clone();
        tags.insert(self.kind.marker().to_owned(), Value::Marker);
        if let Some(id) = &self.id {
            tags.insert("id".to_owned(), Value::Ref(id.clone()));
        }
        tags
    }
}

impl CommitRecord for Entity {
    fn record_id(&self) -> Option<&Ref> { self.id.as_ref() }

    fn required_columns(&self) -> &'static [&'static str] { self.kind.required_tags() }

    fn wire_tags(&self) -> BTreeMap<String, Value> { self.zinc_tags() }

    fn label(&self) -> String { format!("{} {:?}", self.kind.marker(), self.dis().unwrap_or_default()) }
}
