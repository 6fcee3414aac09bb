//! Range queries over a live item set.

use crate::domain::error::{RuntimeError, RuntimeResult};
use crate::domain::index::Index;
use crate::domain::model::Resource;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A filter on one indexed field. Literals are parsed by the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Eq(String),
    Ne(String),
    Lt(String),
    Lte(String),
    Gt(String),
    Gte(String),
    Between(String, String),
}

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Index to order the result by; `Key` when unset.
    pub sort: Option<String>,
    pub reverse: bool,
    pub offset: usize,
    pub limit: Option<usize>,
}

fn sort_by(index: &Index, items: &mut [Arc<dyn Resource>]) {
    items.sort_by(|a, b| {
        if index.less(a.as_ref(), b.as_ref()) {
            Ordering::Less
        } else if index.less(b.as_ref(), a.as_ref()) {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    });
}

/// `[first >= ref, first > ref)` positions of `literal` in a slice sorted by `index`.
fn bounds(index: &Index, sorted: &[Arc<dyn Resource>], literal: &str) -> RuntimeResult<(usize, usize)> {
    let sample = index.parse(literal)?;
    let (gte, gt) = index.tests(sample.as_ref());
    let start = sorted.partition_point(|x| !gte(x.as_ref()));
    let end = sorted.partition_point(|x| !gt(x.as_ref()));
    Ok((start, end.max(start)))
}

/// Applies one filter; the result is sorted by `index`.
pub fn apply(
    index: &Index,
    mut items: Vec<Arc<dyn Resource>>,
    filter: &Filter,
) -> RuntimeResult<Vec<Arc<dyn Resource>>> {
    sort_by(index, &mut items);
    let res = match filter {
        Filter::Eq(v) => {
            let (start, end) = bounds(index, &items, v)?;
            items[start..end].to_vec()
        }
        Filter::Ne(v) => {
            let (start, end) = bounds(index, &items, v)?;
            let mut out = items[..start].to_vec();
            out.extend_from_slice(&items[end..]);
            out
        }
        Filter::Lt(v) => {
            let (start, _) = bounds(index, &items, v)?;
            items[..start].to_vec()
        }
        Filter::Lte(v) => {
            let (_, end) = bounds(index, &items, v)?;
            items[..end].to_vec()
        }
        Filter::Gt(v) => {
            let (_, end) = bounds(index, &items, v)?;
            items[end..].to_vec()
        }
        Filter::Gte(v) => {
            let (start, _) = bounds(index, &items, v)?;
            items[start..].to_vec()
        }
        Filter::Between(lo, hi) => {
            let (start, _) = bounds(index, &items, lo)?;
            let (_, end) = bounds(index, &items, hi)?;
            if start >= end {
                Vec::new()
            } else {
                items[start..end].to_vec()
            }
        }
    };
    Ok(res)
}

/// Filters, orders and pages `items`. Unknown index names are lookup failures;
/// unparsable literals are parse failures.
pub fn query(
    indexes: &BTreeMap<String, Index>,
    items: Vec<Arc<dyn Resource>>,
    filters: &[(String, Filter)],
    options: &QueryOptions,
) -> RuntimeResult<Vec<Arc<dyn Resource>>> {
    let mut items = items;
    for (field, filter) in filters {
        let index = indexes
            .get(field)
            .ok_or_else(|| RuntimeError::not_found("index", field.as_str()))?;
        items = apply(index, items, filter)?;
    }

    let sort = options.sort.as_deref().unwrap_or("Key");
    let index = indexes
        .get(sort)
        .ok_or_else(|| RuntimeError::not_found("index", sort))?;
    sort_by(index, &mut items);
    if options.reverse {
        items.reverse();
    }

    Ok(items
        .into_iter()
        .skip(options.offset)
        .take(options.limit.unwrap_or(usize::MAX))
        .collect())
}
