use crate::parse::{number_to_json, Scalar};
use crate::units::{
    QuantityType, Unit, UnitError, UnitOverrides, UnitPreset, UnitRegistry, DEFAULT_PRESET,
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// A numeric leaf carrying its unit. The quantity is the unit's own, so a
/// tag can never disagree with itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaggedValue {
    unit: Unit,
    value: Option<f64>,
}

impl TaggedValue {
    pub fn new(unit: Unit, value: Option<f64>) -> Self {
        Self { unit, value }
    }

    pub fn quantity(&self) -> QuantityType {
        self.unit.quantity()
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    /// Re-express in `target`. A missing value stays missing but takes the
    /// new unit.
    pub fn converted(&self, target: Unit) -> Result<Self, UnitError> {
        if target.quantity() != self.quantity() {
            return Err(UnitError::UnsupportedConversion {
                from: self.unit,
                to: target,
            });
        }
        let value = match self.value {
            Some(v) => Some(UnitRegistry::global().convert(v, self.unit, target)?),
            None => None,
        };
        Ok(Self {
            unit: target,
            value,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Plain(Scalar),
    Tagged(TaggedValue),
    Branch(Vec<(String, Node)>),
    List(Vec<Node>),
}

impl Node {
    pub fn as_tagged(&self) -> Option<&TaggedValue> {
        match self {
            Node::Tagged(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_plain(&self) -> Option<&Scalar> {
        match self {
            Node::Plain(s) => Some(s),
            _ => None,
        }
    }

    fn child(&self, segment: &str) -> Option<&Node> {
        match self {
            Node::Branch(fields) => fields.iter().find(|(k, _)| k == segment).map(|(_, n)| n),
            Node::List(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    }
}

/// What `apply_units` converts to.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitTarget {
    /// A complete preset. The tree records `name` as its current preset.
    Preset { name: String, units: UnitPreset },
    /// Only the listed quantities change.
    Overrides(UnitOverrides),
}

impl UnitTarget {
    /// A registry preset by name; unknown names resolve to the default preset.
    pub fn named_preset(name: &str) -> Self {
        let registry = UnitRegistry::global();
        match registry.lookup_preset(name) {
            Some(units) => UnitTarget::Preset {
                name: name.trim().to_ascii_lowercase(),
                units,
            },
            None => UnitTarget::Preset {
                name: DEFAULT_PRESET.to_string(),
                units: registry.preset(Some(name)),
            },
        }
    }

    fn unit_for(&self, quantity: QuantityType) -> Option<Unit> {
        match self {
            UnitTarget::Preset { units, .. } => Some(units.unit_for(quantity)),
            UnitTarget::Overrides(o) => o.get(quantity),
        }
    }
}

impl From<UnitOverrides> for UnitTarget {
    fn from(o: UnitOverrides) -> Self {
        UnitTarget::Overrides(o)
    }
}

/// A nested record whose numeric leaves know their units.
///
/// Shape never changes after construction; conversion produces a new tree.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitAwareTree {
    root: Node,
    preset: Option<String>,
}

impl UnitAwareTree {
    pub fn new(root: Node, preset: Option<String>) -> Self {
        Self { root, preset }
    }

    /// Build from a JSON document where `[number|null, "symbol"]` pairs mark
    /// tagged leaves. Any unknown symbol rejects the whole document.
    pub fn from_mixed(value: &Value) -> Result<Self, UnitError> {
        Ok(Self {
            root: mixed_node(value)?,
            preset: None,
        })
    }

    pub fn preset_name(&self) -> Option<&str> {
        self.preset.as_deref()
    }

    /// Look up a node by dotted path; list items are addressed by index.
    pub fn get(&self, path: &str) -> Option<&Node> {
        if path.is_empty() {
            return Some(&self.root);
        }
        path.split('.')
            .try_fold(&self.root, |node, segment| node.child(segment))
    }

    pub fn apply_units(&self, target: &UnitTarget) -> Result<Self, UnitError> {
        let mut changed = 0usize;
        let root = convert_node(&self.root, target, &mut changed)?;
        let preset = match target {
            UnitTarget::Preset { name, .. } => Some(name.clone()),
            UnitTarget::Overrides(_) if changed > 0 => None,
            UnitTarget::Overrides(_) => self.preset.clone(),
        };
        debug!(changed, preset = ?preset, "applied units");
        Ok(Self { root, preset })
    }

    /// Every tagged leaf with its dotted path, in walk order.
    pub fn tagged_leaves(&self) -> Vec<(String, &TaggedValue)> {
        let mut out = Vec::new();
        collect_tagged(&self.root, &mut String::new(), &mut out);
        out
    }

    /// Distinct unit per quantity observed in the tree. When leaves of one
    /// quantity disagree, the first one in walk order wins.
    pub fn unit_summary(&self) -> BTreeMap<QuantityType, Unit> {
        let mut summary = BTreeMap::new();
        for (_, tag) in self.tagged_leaves() {
            summary.entry(tag.quantity()).or_insert(tag.unit());
        }
        summary
    }

    /// Shadow view holding unit symbols where the data has tagged leaves.
    /// Subtrees without tags are omitted; `None` when the tree has none.
    pub fn unit_tree(&self) -> Option<Value> {
        shadow(&self.root)
    }

    /// Plain JSON with tagged leaves reduced to their numbers.
    ///
    /// With `include_units`, a `units` object holding the preset name and
    /// the unit summary is added at the top level. A non-object root is
    /// wrapped as `{"value": .., "units": ..}`.
    pub fn to_plain_values(&self, include_units: bool) -> Value {
        let plain = plain_node(&self.root);
        if !include_units {
            return plain;
        }
        let mut units = Map::new();
        if let Some(name) = &self.preset {
            units.insert("preset".into(), Value::String(name.clone()));
        }
        for (q, u) in self.unit_summary() {
            units.insert(q.name().into(), Value::String(u.symbol().into()));
        }
        match plain {
            Value::Object(mut map) => {
                map.insert("units".into(), Value::Object(units));
                Value::Object(map)
            }
            other => {
                let mut map = Map::new();
                map.insert("value".into(), other);
                map.insert("units".into(), Value::Object(units));
                Value::Object(map)
            }
        }
    }

    /// True when both trees have the same field names, nesting, list lengths
    /// and leaf kinds (tagged leaves additionally share a quantity).
    pub fn same_shape(&self, other: &UnitAwareTree) -> bool {
        same_shape(&self.root, &other.root)
    }
}

fn mixed_node(value: &Value) -> Result<Node, UnitError> {
    Ok(match value {
        Value::Array(items) => match items.as_slice() {
            [n, Value::String(symbol)] if n.is_number() || n.is_null() => {
                let unit = UnitRegistry::global().classify(symbol)?;
                Node::Tagged(TaggedValue::new(unit, n.as_f64()))
            }
            _ => Node::List(items.iter().map(mixed_node).collect::<Result<_, _>>()?),
        },
        Value::Object(map) => Node::Branch(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), mixed_node(v)?)))
                .collect::<Result<_, UnitError>>()?,
        ),
        Value::Null => Node::Plain(Scalar::Null),
        Value::Bool(b) => Node::Plain(Scalar::Bool(*b)),
        Value::Number(n) => Node::Plain(n.as_f64().map_or(Scalar::Null, Scalar::Number)),
        Value::String(s) => Node::Plain(Scalar::Text(s.clone())),
    })
}

fn convert_node(node: &Node, target: &UnitTarget, changed: &mut usize) -> Result<Node, UnitError> {
    Ok(match node {
        Node::Plain(s) => Node::Plain(s.clone()),
        Node::Tagged(tag) => match target.unit_for(tag.quantity()) {
            Some(unit) if unit != tag.unit() => {
                *changed += 1;
                Node::Tagged(tag.converted(unit)?)
            }
            _ => Node::Tagged(*tag),
        },
        Node::Branch(fields) => Node::Branch(
            fields
                .iter()
                .map(|(k, n)| Ok((k.clone(), convert_node(n, target, changed)?)))
                .collect::<Result<_, UnitError>>()?,
        ),
        Node::List(items) => Node::List(
            items
                .iter()
                .map(|n| convert_node(n, target, changed))
                .collect::<Result<_, _>>()?,
        ),
    })
}

fn collect_tagged<'a>(node: &'a Node, path: &mut String, out: &mut Vec<(String, &'a TaggedValue)>) {
    match node {
        Node::Tagged(tag) => out.push((path.clone(), tag)),
        Node::Plain(_) => {}
        Node::Branch(fields) => {
            for (k, child) in fields {
                with_segment(path, k, |p| collect_tagged(child, p, out));
            }
        }
        Node::List(items) => {
            for (i, child) in items.iter().enumerate() {
                with_segment(path, &i.to_string(), |p| collect_tagged(child, p, out));
            }
        }
    }
}

fn with_segment(path: &mut String, segment: &str, f: impl FnOnce(&mut String)) {
    let len = path.len();
    if !path.is_empty() {
        path.push('.');
    }
    path.push_str(segment);
    f(path);
    path.truncate(len);
}

fn shadow(node: &Node) -> Option<Value> {
    match node {
        Node::Tagged(tag) => Some(Value::String(tag.unit().symbol().into())),
        Node::Plain(_) => None,
        Node::Branch(fields) => {
            let map: Map<String, Value> = fields
                .iter()
                .filter_map(|(k, n)| shadow(n).map(|v| (k.clone(), v)))
                .collect();
            (!map.is_empty()).then_some(Value::Object(map))
        }
        Node::List(items) => {
            let shadows: Vec<Option<Value>> = items.iter().map(shadow).collect();
            shadows
                .iter()
                .any(Option::is_some)
                .then(|| Value::Array(shadows.into_iter().map(|s| s.unwrap_or(Value::Null)).collect()))
        }
    }
}

fn plain_node(node: &Node) -> Value {
    match node {
        Node::Plain(s) => s.to_json(),
        Node::Tagged(tag) => number_to_json(tag.value()),
        Node::Branch(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, n)| (k.clone(), plain_node(n)))
                .collect(),
        ),
        Node::List(items) => Value::Array(items.iter().map(plain_node).collect()),
    }
}

fn same_shape(a: &Node, b: &Node) -> bool {
    match (a, b) {
        (Node::Plain(_), Node::Plain(_)) => true,
        (Node::Tagged(x), Node::Tagged(y)) => x.quantity() == y.quantity(),
        (Node::Branch(x), Node::Branch(y)) => {
            x.len() == y.len()
                && x.iter()
                    .zip(y)
                    .all(|((ka, na), (kb, nb))| ka == kb && same_shape(na, nb))
        }
        (Node::List(x), Node::List(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(na, nb)| same_shape(na, nb))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> UnitAwareTree {
        UnitAwareTree::from_mixed(&json!({
            "station": "garden",
            "temperature": { "outside": [68.0, "°F"], "inside": [null, "°F"] },
            "wind": [[10.0, "mp/h"], [4.0, "kt"]],
            "rain": { "day": [5.0, "cups"], "isRaining": false },
            "pressure": [29.92, "inHg"]
        }))
        .unwrap()
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
    }

    #[test]
    fn from_mixed_detects_tagged_pairs() {
        let tree = sample();
        let tags = tree.tagged_leaves();
        let paths: Vec<_> = tags.iter().map(|(p, _)| p.as_str()).collect();
        assert!(paths.contains(&"temperature.outside"));
        assert!(paths.contains(&"wind.1"));
        assert_eq!(tags.len(), 6);
        assert_eq!(
            tree.get("station").and_then(Node::as_plain),
            Some(&Scalar::Text("garden".into()))
        );
    }

    #[test]
    fn from_mixed_rejects_unknown_units() {
        let err = UnitAwareTree::from_mixed(&json!({ "a": { "b": [1.0, "furlongs"] } }))
            .unwrap_err();
        assert_eq!(err, UnitError::UnknownUnit("furlongs".into()));
    }

    #[test]
    fn other_arrays_are_lists() {
        let tree = UnitAwareTree::from_mixed(&json!({ "pair": ["a", "b"], "xs": [1, 2, 3] }))
            .unwrap();
        assert!(tree.tagged_leaves().is_empty());
        assert!(matches!(tree.get("xs"), Some(Node::List(items)) if items.len() == 3));
        assert!(tree.unit_tree().is_none());
    }

    #[test]
    fn preset_converts_every_leaf() {
        let tree = sample();
        let eu = tree.apply_units(&UnitTarget::named_preset("eu")).unwrap();
        assert!(eu.same_shape(&tree));
        assert_eq!(eu.preset_name(), Some("eu"));
        let t = eu.get("temperature.outside").and_then(Node::as_tagged).unwrap();
        assert_eq!(t.unit(), Unit::Celsius);
        assert!(close(t.value().unwrap(), 20.0));
        let missing = eu.get("temperature.inside").and_then(Node::as_tagged).unwrap();
        assert_eq!(missing.unit(), Unit::Celsius);
        assert_eq!(missing.value(), None);
        let rain = eu.get("rain.day").and_then(Node::as_tagged).unwrap();
        assert!(close(rain.value().unwrap(), 1.0));
        for (_, tag) in eu.tagged_leaves() {
            let reg = UnitRegistry::global();
            assert_eq!(tag.unit(), reg.preset(Some("eu")).unit_for(tag.quantity()));
        }
    }

    #[test]
    fn conversion_leaves_receiver_untouched() {
        let tree = sample();
        let before = tree.clone();
        let _ = tree.apply_units(&UnitTarget::named_preset("eu")).unwrap();
        assert_eq!(tree, before);
    }

    #[test]
    fn repeated_target_is_idempotent() {
        let target = UnitTarget::named_preset("eu");
        let once = sample().apply_units(&target).unwrap();
        let twice = once.apply_units(&target).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn round_trip_through_presets() {
        // Start fully in `us` units so the trip back lands on the same units
        let tree = sample()
            .apply_units(&UnitTarget::named_preset("us"))
            .unwrap();
        let back = tree
            .apply_units(&UnitTarget::named_preset("eu"))
            .and_then(|t| t.apply_units(&UnitTarget::named_preset("us")))
            .unwrap();
        assert_eq!(tree.tagged_leaves().len(), back.tagged_leaves().len());
        for ((_, a), (_, b)) in tree.tagged_leaves().iter().zip(back.tagged_leaves()) {
            assert_eq!(a.unit(), b.unit());
            match (a.value(), b.value()) {
                (Some(x), Some(y)) => assert!(close(x, y)),
                (x, y) => assert_eq!(x, y),
            }
        }
    }

    #[test]
    fn overrides_touch_only_named_quantities() {
        let tree = sample();
        let target = UnitTarget::from(UnitOverrides::new().with(Unit::MetersPerSecond));
        let out = tree.apply_units(&target).unwrap();
        for ((path, before), (_, after)) in tree.tagged_leaves().iter().zip(out.tagged_leaves()) {
            if before.quantity() == QuantityType::Wind {
                assert_eq!(after.unit(), Unit::MetersPerSecond, "{path}");
            } else {
                assert_eq!(*before, after, "{path}");
            }
        }
        assert_eq!(out.preset_name(), None);
    }

    #[test]
    fn noop_override_keeps_preset_name() {
        let eu = sample().apply_units(&UnitTarget::named_preset("eu")).unwrap();
        let same = eu
            .apply_units(&UnitOverrides::new().with(Unit::Celsius).into())
            .unwrap();
        assert_eq!(same.preset_name(), Some("eu"));
    }

    #[test]
    fn unknown_preset_name_uses_default() {
        match UnitTarget::named_preset("martian") {
            UnitTarget::Preset { name, units } => {
                assert_eq!(name, DEFAULT_PRESET);
                assert_eq!(units, UnitRegistry::global().preset(None));
            }
            other => panic!("unexpected target {other:?}"),
        }
    }

    #[test]
    fn plain_values_with_units() {
        let tree = sample().apply_units(&UnitTarget::named_preset("us")).unwrap();
        let plain = tree.to_plain_values(true);
        assert_eq!(plain["temperature"]["inside"], json!(null));
        assert_eq!(plain["pressure"], json!(29.92));
        assert_eq!(plain["rain"]["isRaining"], json!(false));
        assert_eq!(plain["units"]["preset"], json!("us"));
        assert_eq!(plain["units"]["temperature"], json!("°F"));
        // first wind leaf in walk order
        assert_eq!(plain["units"]["wind"], json!("mp/h"));
        assert!(tree.to_plain_values(false).get("units").is_none());
    }

    #[test]
    fn shadow_tree_mirrors_tags() {
        let shadow = sample().unit_tree().unwrap();
        assert_eq!(
            shadow,
            json!({
                "pressure": "inHg",
                "rain": { "day": "cups" },
                "temperature": { "inside": "°F", "outside": "°F" },
                "wind": ["mp/h", "kt"]
            })
        );
    }

    #[test]
    fn get_by_path() {
        let tree = sample();
        assert!(tree.get("").is_some());
        assert!(tree.get("wind.0").and_then(Node::as_tagged).is_some());
        assert!(tree.get("wind.7").is_none());
        assert!(tree.get("rain.day.deeper").is_none());
    }
}
