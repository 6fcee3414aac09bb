//! Ordered per-field indexes over type-erased resources.
//!
//! An [`Index`] bundles three behaviors that must agree on one total order:
//! a strict comparator, a pair of reference-relative range tests (`>= ref`,
//! `> ref`), and a parser that turns a literal into a sample object carrying
//! only the indexed field. Range scans bisect a sorted slice with the tests,
//! so a disagreement between them silently returns wrong rows.

use crate::domain::error::RuntimeResult;
use crate::domain::model::Resource;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub mod compare;
pub mod parameter;
pub mod query;

pub use compare::{general_cmp, general_greater_than, general_greater_than_equal, general_less_than};
pub use parameter::parameter_index;
pub use query::{query, Filter, QueryOptions};

/// Predicate over a candidate object.
pub type Test = Box<dyn Fn(&dyn Resource) -> bool + Send + Sync>;

type LessFn = dyn Fn(&dyn Resource, &dyn Resource) -> bool + Send + Sync;
type TestsFn = dyn Fn(&dyn Resource) -> (Test, Test) + Send + Sync;
type ParseFn = dyn Fn(&str) -> RuntimeResult<Box<dyn Resource>> + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    String,
    Boolean,
    Parameter,
}

impl IndexType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexType::String => "string",
            IndexType::Boolean => "boolean",
            IndexType::Parameter => "parameter",
        }
    }
}

#[derive(Clone)]
pub struct Index {
    unique: bool,
    index_type: IndexType,
    less: Arc<LessFn>,
    tests: Arc<TestsFn>,
    parse: Arc<ParseFn>,
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Index")
            .field("unique", &self.unique)
            .field("type", &self.index_type.as_str())
            .finish()
    }
}

impl Index {
    pub fn make<L, T, P>(unique: bool, index_type: IndexType, less: L, tests: T, parse: P) -> Self
    where
        L: Fn(&dyn Resource, &dyn Resource) -> bool + Send + Sync + 'static,
        T: Fn(&dyn Resource) -> (Test, Test) + Send + Sync + 'static,
        P: Fn(&str) -> RuntimeResult<Box<dyn Resource>> + Send + Sync + 'static,
    {
        Self {
            unique,
            index_type,
            less: Arc::new(less),
            tests: Arc::new(tests),
            parse: Arc::new(parse),
        }
    }

    /// String index ordered lexically on the value `get` extracts.
    pub fn string<G, S>(unique: bool, template: Arc<dyn Resource>, get: G, set: S) -> Self
    where
        G: Fn(&dyn Resource) -> String + Send + Sync + 'static,
        S: Fn(&mut dyn Resource, &str) + Send + Sync + 'static,
    {
        let get = Arc::new(get);
        let less_get = get.clone();
        Index::make(
            unique,
            IndexType::String,
            move |i, j| less_get(i) < less_get(j),
            move |reference| {
                let ref_value = get(reference);
                let (gte_get, gt_get) = (get.clone(), get.clone());
                let gte_ref = ref_value.clone();
                (
                    Box::new(move |s: &dyn Resource| gte_get(s) >= gte_ref) as Test,
                    Box::new(move |s: &dyn Resource| gt_get(s) > ref_value) as Test,
                )
            },
            move |s| {
                let mut sample = template.new_blank();
                set(&mut *sample, s);
                Ok(sample)
            },
        )
    }

    /// Boolean index where `false` (unset) sorts before `true`.
    pub fn boolean<G, S>(
        unique: bool,
        field: impl Into<String>,
        template: Arc<dyn Resource>,
        get: G,
        set: S,
    ) -> Self
    where
        G: Fn(&dyn Resource) -> bool + Send + Sync + 'static,
        S: Fn(&mut dyn Resource, bool) + Send + Sync + 'static,
    {
        let field = field.into();
        let get = Arc::new(get);
        let less_get = get.clone();
        Index::make(
            unique,
            IndexType::Boolean,
            move |i, j| !less_get(i) && less_get(j),
            move |reference| {
                let avail = get(reference);
                let (gte_get, gt_get) = (get.clone(), get.clone());
                (
                    Box::new(move |s: &dyn Resource| {
                        let v = gte_get(s);
                        v || v == avail
                    }) as Test,
                    Box::new(move |s: &dyn Resource| gt_get(s) && !avail) as Test,
                )
            },
            move |s| {
                let value = match s {
                    "true" => true,
                    "false" => false,
                    _ => {
                        return Err(crate::domain::error::RuntimeError::parse(
                            field.as_str(),
                            s,
                            format!("{field} must be true or false"),
                        ))
                    }
                };
                let mut sample = template.new_blank();
                set(&mut *sample, value);
                Ok(sample)
            },
        )
    }

    pub fn unique(&self) -> bool {
        self.unique
    }

    pub fn index_type(&self) -> IndexType {
        self.index_type
    }

    pub fn less(&self, a: &dyn Resource, b: &dyn Resource) -> bool {
        (self.less)(a, b)
    }

    /// Neither sorts before the other.
    pub fn equal(&self, a: &dyn Resource, b: &dyn Resource) -> bool {
        !self.less(a, b) && !self.less(b, a)
    }

    /// `(gte, gt)` tests relative to `reference`.
    pub fn tests(&self, reference: &dyn Resource) -> (Test, Test) {
        (self.tests)(reference)
    }

    pub fn parse(&self, s: &str) -> RuntimeResult<Box<dyn Resource>> {
        (self.parse)(s)
    }
}

/// Indexes every kind carries: `Key`, `Valid` and `Available`.
pub fn make_base_indexes(template: &dyn Resource) -> BTreeMap<String, Index> {
    let template: Arc<dyn Resource> = Arc::from(template.new_blank());
    let mut res = BTreeMap::new();
    res.insert(
        "Key".to_string(),
        Index::string(true, template.clone(), |r| r.key(), |r, s| r.set_key(s)),
    );
    res.insert(
        "Valid".to_string(),
        Index::boolean(
            false,
            "Valid",
            template.clone(),
            |r| r.validation().validated,
            |r, b| r.validation_mut().validated = b,
        ),
    );
    res.insert(
        "Available".to_string(),
        Index::boolean(
            false,
            "Available",
            template,
            |r| r.validation().available,
            |r, b| r.validation_mut().available = b,
        ),
    );
    res
}

/// Reports every unique index on which `obj` collides with another live object.
pub fn check_unique(obj: &dyn Resource, items: &[Arc<dyn Resource>]) -> Vec<String> {
    let key = obj.key();
    let mut errors = Vec::new();
    for (name, idx) in obj.indexes() {
        if !idx.unique() {
            continue;
        }
        for other in items {
            if other.key() == key {
                continue;
            }
            if idx.equal(obj, other.as_ref()) {
                errors.push(format!(
                    "{} {} and {} violate unique constraint on {}",
                    obj.prefix(),
                    key,
                    other.key(),
                    name
                ));
            }
        }
    }
    errors
}
