use std::sync::Arc;

use ahash::HashMap;
use ahash::HashMapExt;
use ahash::HashSet;
use ahash::HashSetExt;
use apollo_compiler::ExecutableDocument;
use apollo_compiler::ast::OperationType;
use apollo_compiler::executable::Field;
use apollo_compiler::executable::Operation;
use apollo_compiler::executable::Selection;
use apollo_compiler::executable::SelectionSet;

use crate::cost::TypeWeights;
use crate::cost::Variables;
use crate::cost::Weight;
use crate::cost::WeightArgs;
use crate::error::ThrottleError;

/// Walks a parsed operation against a [`TypeWeights`] table and produces a
/// single non-negative integer cost.
///
/// The walk never executes anything: list sizes come from slicing arguments
/// and variables, so the result is an upper-bound estimate available before
/// the first resolver runs.
pub struct CostAnalyzer {
    weights: Arc<TypeWeights>,
    enforce_bounded_lists: bool,
}

/// Memoizes fragment definition costs. Each fragment is priced once against
/// its type condition; every spread then charges the cached amount.
struct FragmentResolver<'a> {
    document: &'a ExecutableDocument,
    costs: HashMap<String, u64>,
    in_progress: HashSet<String>,
}

impl<'a> FragmentResolver<'a> {
    fn new(document: &'a ExecutableDocument) -> Self {
        Self {
            document,
            costs: HashMap::new(),
            in_progress: HashSet::new(),
        }
    }
}

impl CostAnalyzer {
    pub fn new(weights: Arc<TypeWeights>) -> Self {
        Self {
            weights,
            enforce_bounded_lists: false,
        }
    }

    /// Reject list fields that have no size-bounding argument instead of
    /// pricing them as a single node.
    pub fn enforce_bounded_lists(mut self, enforce: bool) -> Self {
        self.enforce_bounded_lists = enforce;
        self
    }

    /// Total cost of every operation in the document.
    pub fn cost(
        &self,
        document: &ExecutableDocument,
        variables: &Variables,
    ) -> Result<u64, ThrottleError> {
        let mut fragments = FragmentResolver::new(document);
        // Fragment definitions are priced up front and contribute nothing by
        // themselves; their cost is paid per spread.
        for name in document.fragments.keys() {
            self.fragment_cost(name.as_str(), variables, &mut fragments)?;
        }

        let mut total: u64 = 0;
        if let Some(operation) = &document.operations.anonymous {
            total = checked_sum(
                total,
                self.score_operation(operation, variables, &mut fragments)?,
            )?;
        }
        for operation in document.operations.named.values() {
            total = checked_sum(
                total,
                self.score_operation(operation, variables, &mut fragments)?,
            )?;
        }
        Ok(total)
    }

    /// Deepest field nesting across the document's operations and fragment
    /// definitions. Fragment spreads count as leaves; their definitions are
    /// measured where they are defined.
    pub fn depth(document: &ExecutableDocument) -> usize {
        let mut deepest = 0;
        if let Some(operation) = &document.operations.anonymous {
            deepest = deepest.max(selection_set_depth(&operation.selection_set));
        }
        for operation in document.operations.named.values() {
            deepest = deepest.max(selection_set_depth(&operation.selection_set));
        }
        for fragment in document.fragments.values() {
            deepest = deepest.max(selection_set_depth(&fragment.selection_set));
        }
        deepest
    }

    fn fragment_cost(
        &self,
        name: &str,
        variables: &Variables,
        fragments: &mut FragmentResolver<'_>,
    ) -> Result<u64, ThrottleError> {
        if let Some(cost) = fragments.costs.get(name) {
            return Ok(*cost);
        }
        let document = fragments.document;
        let Some(fragment) = document.fragments.get(name) else {
            return Err(ThrottleError::InvalidQuery(format!(
                "fragment {name} is spread but never defined"
            )));
        };
        if !fragments.in_progress.insert(name.to_string()) {
            return Err(ThrottleError::InvalidQuery(format!(
                "fragment {name} spreads itself"
            )));
        }
        let cost = self.score_selection_set(
            &fragment.selection_set,
            fragment.type_condition().as_str(),
            variables,
            fragments,
        )?;
        fragments.in_progress.remove(name);
        fragments.costs.insert(name.to_string(), cost);
        Ok(cost)
    }

    fn score_operation(
        &self,
        operation: &Operation,
        variables: &Variables,
        fragments: &mut FragmentResolver<'_>,
    ) -> Result<u64, ThrottleError> {
        let root = self
            .weights
            .root(operation.operation_type)
            .unwrap_or(default_root_name(operation.operation_type));
        let base = self
            .weights
            .get(root)
            .and_then(|row| row.weight.constant())
            .unwrap_or(0);
        let selections =
            self.score_selection_set(&operation.selection_set, root, variables, fragments)?;
        checked_sum(base, selections)
    }

    fn score_selection_set(
        &self,
        selection_set: &SelectionSet,
        parent: &str,
        variables: &Variables,
        fragments: &mut FragmentResolver<'_>,
    ) -> Result<u64, ThrottleError> {
        let mut cost: u64 = 0;
        for selection in &selection_set.selections {
            let selected = match selection {
                Selection::Field(field) => self.score_field(field, parent, variables, fragments)?,
                Selection::InlineFragment(inline) => {
                    let Some(condition) = &inline.type_condition else {
                        return Err(ThrottleError::InvalidQuery(
                            "inline fragment is missing a type condition".to_string(),
                        ));
                    };
                    self.score_selection_set(
                        &inline.selection_set,
                        condition.as_str(),
                        variables,
                        fragments,
                    )?
                }
                Selection::FragmentSpread(spread) => {
                    self.fragment_cost(spread.fragment_name.as_str(), variables, fragments)?
                }
            };
            cost = checked_sum(cost, selected)?;
        }
        Ok(cost)
    }

    fn score_field(
        &self,
        field: &Field,
        parent: &str,
        variables: &Variables,
        fragments: &mut FragmentResolver<'_>,
    ) -> Result<u64, ThrottleError> {
        // Meta fields (__typename and friends) are served from the schema
        // itself and carry no resolver cost.
        if field.name.starts_with("__") {
            return Ok(0);
        }

        // A field whose name is itself a row uses that row directly.
        if let Some(row) = self.weights.get(field.name.as_str()) {
            let inner = self.score_selection_set(
                &field.selection_set,
                field.name.as_str(),
                variables,
                fragments,
            )?;
            return match &row.weight {
                Weight::Function(weight) if !field.arguments.is_empty() => weight(&WeightArgs {
                    arguments: &field.arguments,
                    variables,
                    inner_cost: inner,
                }),
                Weight::Function(_) => Ok(inner),
                Weight::Constant(weight) => checked_sum(*weight, inner),
            };
        }

        let parent_row = self.weights.get(parent).ok_or_else(|| {
            ThrottleError::SchemaMismatch(format!("type {parent} has no weight entry"))
        })?;
        let Some(field_weight) = parent_row.fields.get(field.name.as_str()) else {
            return Err(ThrottleError::SchemaMismatch(format!(
                "field {}.{} has no weight entry",
                parent, field.name
            )));
        };
        if self.enforce_bounded_lists && field_weight.unbounded_list {
            return Err(ThrottleError::InvalidQuery(format!(
                "list field {}.{} has no size-bounding argument",
                parent, field.name
            )));
        }

        if let Some(target) = field_weight.resolve_to.as_deref() {
            let inner =
                self.score_selection_set(&field.selection_set, target, variables, fragments)?;
            return match &field_weight.weight {
                Weight::Function(weight) => weight(&WeightArgs {
                    arguments: &field.arguments,
                    variables,
                    inner_cost: inner,
                }),
                Weight::Constant(_) => {
                    let resolved = self.weights.get(target).ok_or_else(|| {
                        ThrottleError::SchemaMismatch(format!("type {target} has no weight entry"))
                    })?;
                    checked_sum(resolved.weight.constant().unwrap_or(0), inner)
                }
            };
        }

        match &field_weight.weight {
            Weight::Constant(weight) => Ok(*weight),
            Weight::Function(weight) => weight(&WeightArgs {
                arguments: &field.arguments,
                variables,
                inner_cost: 0,
            }),
        }
    }
}

fn default_root_name(operation: OperationType) -> &'static str {
    match operation {
        OperationType::Query => "Query",
        OperationType::Mutation => "Mutation",
        OperationType::Subscription => "Subscription",
    }
}

fn selection_set_depth(selection_set: &SelectionSet) -> usize {
    selection_set
        .selections
        .iter()
        .map(|selection| match selection {
            Selection::Field(field) => 1 + selection_set_depth(&field.selection_set),
            Selection::InlineFragment(inline) => selection_set_depth(&inline.selection_set),
            Selection::FragmentSpread(_) => 0,
        })
        .max()
        .unwrap_or(0)
}

fn checked_sum(a: u64, b: u64) -> Result<u64, ThrottleError> {
    a.checked_add(b)
        .ok_or_else(|| ThrottleError::CostOverflow("a selection set".to_string()))
}
