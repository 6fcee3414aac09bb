//! Indexes over typed parameters.
//!
//! The order, tests and parser come from the parameter's declared schema, so
//! any parameter becomes a sortable, filterable field without new code.

use crate::app::RequestContext;
use crate::domain::error::{RuntimeError, RuntimeResult};
use crate::domain::index::compare::{general_greater_than, general_greater_than_equal, general_less_than};
use crate::domain::index::{Index, IndexType, Test};
use crate::domain::model::{downcast, Param, Resource};
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Builds an index over `parameter` for objects shaped like `template`.
///
/// Fails with a lookup error when the parameter is not defined.
pub fn parameter_index(
    ctx: &RequestContext<'_>,
    template: &dyn Resource,
    parameter: &str,
) -> RuntimeResult<Index> {
    let pobj = ctx
        .find("params", parameter)
        .ok_or_else(|| RuntimeError::not_found("params", parameter))?;
    let param = downcast::<Param>(pobj.as_ref())
        .cloned()
        .ok_or_else(|| RuntimeError::not_found("params", parameter))?;

    let name = Arc::new(parameter.to_string());
    let default = Arc::new(param.default_value());
    let value_of = {
        let (name, default) = (name.clone(), default.clone());
        Arc::new(move |r: &dyn Resource| -> JsonValue {
            r.param(&name).unwrap_or_else(|| (*default).clone())
        })
    };
    let template: Arc<dyn Resource> = Arc::from(template.new_blank());
    let evaluator = ctx.evaluator();

    let less_value = value_of.clone();
    Ok(Index::make(
        false,
        IndexType::Parameter,
        move |i, j| general_less_than(&less_value(i), &less_value(j)),
        move |reference| {
            let jp = value_of(reference);
            let (gte_value, gt_value) = (value_of.clone(), value_of.clone());
            let gte_ref = jp.clone();
            (
                Box::new(move |s: &dyn Resource| general_greater_than_equal(&gte_value(s), &gte_ref))
                    as Test,
                Box::new(move |s: &dyn Resource| general_greater_than(&gt_value(s), &jp)) as Test,
            )
        },
        move |s| {
            let value = param.validate_value(evaluator.as_ref(), s)?;
            let mut sample = template.new_blank();
            sample.set_param(&name, value)?;
            Ok(sample)
        },
    ))
}
