use std::fmt;
use std::sync::Arc;

use ahash::HashMap;
use ahash::HashMapExt;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::ast::OperationType;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::validation::Valid;

use crate::configuration::TypeWeightsConfig;
use crate::cost::Variables;
use crate::error::ThrottleError;

/// Everything a weight function may consult: the field's arguments, the
/// operation variables, and the already-computed cost of the field's own
/// selection set.
pub struct WeightArgs<'a> {
    pub arguments: &'a [Node<ast::Argument>],
    pub variables: &'a Variables,
    pub inner_cost: u64,
}

impl WeightArgs<'_> {
    /// Non-negative integer value of the named argument, following variable
    /// references into the operation variables. `None` when the argument is
    /// absent or not an integer.
    pub fn integer_argument(&self, name: &str) -> Option<u64> {
        let argument = self.arguments.iter().find(|arg| arg.name.as_str() == name)?;
        match argument.value.as_ref() {
            ast::Value::Int(value) => value.try_to_i32().ok().map(|value| value.max(0) as u64),
            ast::Value::Variable(variable) => self
                .variables
                .get(variable.as_str())
                .and_then(serde_json::Value::as_u64),
            _ => None,
        }
    }

    /// First slicing argument present on the field.
    pub fn slice_size(&self, slicing_arguments: &[String]) -> Option<u64> {
        slicing_arguments
            .iter()
            .find_map(|name| self.integer_argument(name))
    }
}

/// Pure function of the request that prices one field.
pub type WeightFn = Arc<dyn Fn(&WeightArgs<'_>) -> Result<u64, ThrottleError> + Send + Sync>;

/// A weight is either a constant or a function of the request.
#[derive(Clone)]
pub enum Weight {
    Constant(u64),
    Function(WeightFn),
}

impl Weight {
    pub(crate) fn constant(&self) -> Option<u64> {
        match self {
            Weight::Constant(weight) => Some(*weight),
            Weight::Function(_) => None,
        }
    }
}

impl fmt::Debug for Weight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Weight::Constant(weight) => write!(f, "Constant({weight})"),
            Weight::Function(_) => write!(f, "Function(..)"),
        }
    }
}

/// Weight of a single field, plus the row its selection set is scored
/// against.
#[derive(Clone, Debug)]
pub struct FieldWeight {
    pub weight: Weight,
    /// Name of the table row the field resolves into. Rows reference each
    /// other by name, which keeps cyclic schemas representable.
    pub resolve_to: Option<String>,
    /// The field returns a list with no size-bounding argument.
    pub unbounded_list: bool,
}

impl FieldWeight {
    /// A scalar-style field with a fixed weight.
    pub fn constant(weight: u64) -> Self {
        Self {
            weight: Weight::Constant(weight),
            resolve_to: None,
            unbounded_list: false,
        }
    }

    /// A field that links to another row.
    pub fn resolving(weight: u64, resolve_to: impl Into<String>) -> Self {
        Self {
            weight: Weight::Constant(weight),
            resolve_to: Some(resolve_to.into()),
            unbounded_list: false,
        }
    }

    /// A field priced by a weight function.
    pub fn function(weight: WeightFn, resolve_to: Option<String>) -> Self {
        Self {
            weight: Weight::Function(weight),
            resolve_to,
            unbounded_list: false,
        }
    }
}

/// One row of the table: a type's own weight and its fields.
#[derive(Clone, Debug)]
pub struct TypeWeight {
    pub weight: Weight,
    pub fields: HashMap<String, FieldWeight>,
}

impl TypeWeight {
    pub fn new(weight: u64) -> Self {
        Self {
            weight: Weight::Constant(weight),
            fields: HashMap::new(),
        }
    }

    pub fn with_weight_fn(weight: WeightFn) -> Self {
        Self {
            weight: Weight::Function(weight),
            fields: HashMap::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, weight: FieldWeight) -> Self {
        self.fields.insert(name.into(), weight);
        self
    }
}

/// Immutable mapping from type and field names to weights and weight
/// functions, built once per schema and shared read-only across requests.
#[derive(Clone, Debug, Default)]
pub struct TypeWeights {
    types: HashMap<String, TypeWeight>,
    query_root: Option<String>,
    mutation_root: Option<String>,
    subscription_root: Option<String>,
}

impl TypeWeights {
    /// An empty table, for hand-tuned weights.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from a parsed schema and the default weights.
    ///
    /// Composite types become rows weighted `object` (the mutation root
    /// keeps `object` as its row weight; its *fields* inherit `mutation`).
    /// Scalar and enum fields get the `scalar` weight. Fields returning
    /// another composite type link to its row by name. List fields bounded
    /// by one of `slicing_arguments` are priced by a generated weight
    /// function: `slice size × (connection + inner cost)`.
    pub fn from_schema(
        schema: &Valid<Schema>,
        defaults: &TypeWeightsConfig,
        slicing_arguments: &[String],
    ) -> Self {
        let mut table = TypeWeights::new();
        let mutation_root = schema
            .root_operation(OperationType::Mutation)
            .map(|name| name.to_string());

        for (type_name, definition) in &schema.types {
            if definition.is_built_in() || type_name.as_str().starts_with("__") {
                continue;
            }
            let fields = match definition {
                ExtendedType::Object(object) => Some(&object.fields),
                ExtendedType::Interface(interface) => Some(&interface.fields),
                ExtendedType::Union(_) => None,
                ExtendedType::Scalar(_) | ExtendedType::Enum(_) | ExtendedType::InputObject(_) => {
                    continue;
                }
            };

            let mut row = TypeWeight::new(defaults.object);
            let is_mutation_root = mutation_root.as_deref() == Some(type_name.as_str());
            if let Some(fields) = fields {
                for (field_name, field) in fields {
                    let weight =
                        field_weight(schema, field, is_mutation_root, defaults, slicing_arguments);
                    row.fields.insert(field_name.to_string(), weight);
                }
            }
            table.types.insert(type_name.to_string(), row);
        }

        for operation in [
            OperationType::Query,
            OperationType::Mutation,
            OperationType::Subscription,
        ] {
            if let Some(root) = schema.root_operation(operation) {
                table.set_root(operation, root.as_str());
            }
        }
        table
    }

    /// Insert or replace a row.
    pub fn insert_type(&mut self, name: impl Into<String>, row: TypeWeight) {
        self.types.insert(name.into(), row);
    }

    /// Bind an operation kind to its root row.
    pub fn set_root(&mut self, operation: OperationType, type_name: impl Into<String>) {
        let slot = match operation {
            OperationType::Query => &mut self.query_root,
            OperationType::Mutation => &mut self.mutation_root,
            OperationType::Subscription => &mut self.subscription_root,
        };
        *slot = Some(type_name.into());
    }

    pub fn get(&self, type_name: &str) -> Option<&TypeWeight> {
        self.types.get(type_name)
    }

    pub(crate) fn root(&self, operation: OperationType) -> Option<&str> {
        match operation {
            OperationType::Query => self.query_root.as_deref(),
            OperationType::Mutation => self.mutation_root.as_deref(),
            OperationType::Subscription => self.subscription_root.as_deref(),
        }
    }
}

fn field_weight(
    schema: &Valid<Schema>,
    field: &ast::FieldDefinition,
    is_mutation_root: bool,
    defaults: &TypeWeightsConfig,
    slicing_arguments: &[String],
) -> FieldWeight {
    let inner = field.ty.inner_named_type();
    let composite = matches!(
        schema.types.get(inner),
        Some(ExtendedType::Object(_) | ExtendedType::Interface(_) | ExtendedType::Union(_))
    );
    let resolve_to = composite.then(|| inner.to_string());

    if is_mutation_root {
        let mutation = defaults.mutation;
        return match resolve_to {
            // Invoked by the analyzer with the field's selection cost, so the
            // mutation surcharge replaces the resolved row's own weight.
            Some(resolve_to) => FieldWeight::function(
                Arc::new(move |args| {
                    args.inner_cost
                        .checked_add(mutation)
                        .ok_or_else(|| ThrottleError::CostOverflow("a mutation field".to_string()))
                }),
                Some(resolve_to),
            ),
            None => FieldWeight::constant(mutation),
        };
    }

    if !composite {
        return FieldWeight::constant(defaults.scalar);
    }

    if field.ty.is_list() {
        let slicing: Vec<String> = slicing_arguments
            .iter()
            .filter(|name| {
                field
                    .arguments
                    .iter()
                    .any(|argument| argument.name.as_str() == name.as_str())
            })
            .cloned()
            .collect();
        if slicing.is_empty() {
            return FieldWeight {
                weight: Weight::Constant(defaults.object),
                resolve_to,
                unbounded_list: true,
            };
        }
        let connection = defaults.connection;
        return FieldWeight {
            weight: Weight::Function(Arc::new(move |args| {
                // A bounded field called without its slicing argument prices
                // as a single node.
                let size = args.slice_size(&slicing).unwrap_or(1);
                let per_node = connection
                    .checked_add(args.inner_cost)
                    .ok_or_else(|| ThrottleError::CostOverflow("a list field".to_string()))?;
                size.checked_mul(per_node)
                    .ok_or_else(|| ThrottleError::CostOverflow("a list field".to_string()))
            })),
            resolve_to,
            unbounded_list: false,
        };
    }

    FieldWeight {
        weight: Weight::Constant(defaults.object),
        resolve_to,
        unbounded_list: false,
    }
}
