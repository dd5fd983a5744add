//! Abstract, object shaped query tree.
//!
//! This is the input to the pipeline. A front end builds these, the
//! queryable translator lowers them to SQL trees.

use std::fmt;

use crate::expr::binary_expr::BinaryOperator;
use crate::scalar::ScalarValue;
use crate::translate::descriptor::OperationDescriptor;
use crate::types::DataType;

#[derive(Debug, Clone, PartialEq)]
pub struct Lambda {
    pub params: Vec<String>,
    pub body: QueryExpr,
}

impl Lambda {
    pub fn new(param: impl Into<String>, body: QueryExpr) -> Self {
        Lambda {
            params: vec![param.into()],
            body,
        }
    }

    pub fn new2(p1: impl Into<String>, p2: impl Into<String>, body: QueryExpr) -> Self {
        Lambda {
            params: vec![p1.into(), p2.into()],
            body,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Min,
    Max,
    Average,
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Count => "Count",
            Self::Sum => "Sum",
            Self::Min => "Min",
            Self::Max => "Max",
            Self::Average => "Average",
        };
        write!(f, "{s}")
    }
}

/// Scalar (or object) valued expression inside a query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryExpr {
    Constant(ScalarValue, DataType),
    Parameter(String, DataType),
    /// Reference to a lambda parameter.
    Variable(String),
    /// Property, navigation or field access.
    Member {
        target: Box<QueryExpr>,
        member: String,
    },
    MethodCall {
        receiver: Option<Box<QueryExpr>>,
        method: OperationDescriptor,
        args: Vec<QueryExpr>,
    },
    Binary {
        op: BinaryOperator,
        left: Box<QueryExpr>,
        right: Box<QueryExpr>,
    },
    Not(Box<QueryExpr>),
    Conditional {
        test: Box<QueryExpr>,
        then: Box<QueryExpr>,
        otherwise: Box<QueryExpr>,
    },
    /// Construct an object with named fields.
    New(Vec<(String, QueryExpr)>),
    /// Nested collection.
    Collection(Box<Queryable>),
    /// Number of elements in a correlated collection.
    Count(Box<Queryable>),
    /// If a correlated collection has any elements.
    Any(Box<Queryable>),
    /// Aggregate over a group, only valid in a group by result selector.
    Aggregate {
        function: AggregateFunction,
        group: String,
        selector: Option<Box<Lambda>>,
    },
    /// `needle` is in the values of an array valued expression.
    Contains {
        values: Box<QueryExpr>,
        needle: Box<QueryExpr>,
    },
}

impl QueryExpr {
    pub fn member(self, name: impl Into<String>) -> QueryExpr {
        QueryExpr::Member {
            target: Box::new(self),
            member: name.into(),
        }
    }

    pub fn call(self, method: OperationDescriptor, args: Vec<QueryExpr>) -> QueryExpr {
        QueryExpr::MethodCall {
            receiver: Some(Box::new(self)),
            method,
            args,
        }
    }

    pub fn binary(self, op: BinaryOperator, right: QueryExpr) -> QueryExpr {
        QueryExpr::Binary {
            op,
            left: Box::new(self),
            right: Box::new(right),
        }
    }

    pub fn eq(self, right: QueryExpr) -> QueryExpr {
        self.binary(BinaryOperator::Eq, right)
    }

    pub fn not_eq(self, right: QueryExpr) -> QueryExpr {
        self.binary(BinaryOperator::NotEq, right)
    }

    pub fn gt(self, right: QueryExpr) -> QueryExpr {
        self.binary(BinaryOperator::Gt, right)
    }

    pub fn lt(self, right: QueryExpr) -> QueryExpr {
        self.binary(BinaryOperator::Lt, right)
    }

    pub fn and(self, right: QueryExpr) -> QueryExpr {
        self.binary(BinaryOperator::And, right)
    }

    pub fn or(self, right: QueryExpr) -> QueryExpr {
        self.binary(BinaryOperator::Or, right)
    }
}

pub fn var(name: impl Into<String>) -> QueryExpr {
    QueryExpr::Variable(name.into())
}

pub fn constant(value: impl Into<ScalarValue>) -> QueryExpr {
    let value = value.into();
    let datatype = value.datatype();
    QueryExpr::Constant(value, datatype)
}

pub fn null_constant(datatype: DataType) -> QueryExpr {
    QueryExpr::Constant(ScalarValue::Null, datatype)
}

pub fn parameter(name: impl Into<String>, datatype: DataType) -> QueryExpr {
    QueryExpr::Parameter(name.into(), datatype)
}

pub fn static_call(method: OperationDescriptor, args: Vec<QueryExpr>) -> QueryExpr {
    QueryExpr::MethodCall {
        receiver: None,
        method,
        args,
    }
}

pub fn new_object<S: Into<String>>(fields: impl IntoIterator<Item = (S, QueryExpr)>) -> QueryExpr {
    QueryExpr::New(fields.into_iter().map(|(n, e)| (n.into(), e)).collect())
}

/// A sequence producing operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Queryable {
    /// All rows of an entity.
    Source { entity: String },
    /// Collection navigation off of an entity in the enclosing query.
    ///
    /// Only valid as the root of a nested collection.
    Navigation {
        source: QueryExpr,
        navigation: String,
    },
    Where {
        input: Box<Queryable>,
        predicate: Lambda,
    },
    Select {
        input: Box<Queryable>,
        selector: Lambda,
    },
    OrderBy {
        input: Box<Queryable>,
        key: Lambda,
        ascending: bool,
        /// Append to the existing ordering (`ThenBy`) instead of replacing
        /// it.
        then: bool,
    },
    Skip {
        input: Box<Queryable>,
        count: QueryExpr,
    },
    Take {
        input: Box<Queryable>,
        count: QueryExpr,
    },
    Distinct {
        input: Box<Queryable>,
    },
    /// Inner join on key equality.
    Join {
        outer: Box<Queryable>,
        inner: Box<Queryable>,
        outer_key: Lambda,
        inner_key: Lambda,
        /// Two parameter lambda, outer and inner element.
        result: Lambda,
    },
    GroupBy {
        input: Box<Queryable>,
        key: Lambda,
        /// Two parameter lambda, key and group.
        result: Lambda,
    },
}

impl Queryable {
    pub fn source(entity: impl Into<String>) -> Self {
        Queryable::Source {
            entity: entity.into(),
        }
    }

    pub fn navigation(source: QueryExpr, navigation: impl Into<String>) -> Self {
        Queryable::Navigation {
            source,
            navigation: navigation.into(),
        }
    }

    pub fn filter(self, param: &str, predicate: QueryExpr) -> Self {
        Queryable::Where {
            input: Box::new(self),
            predicate: Lambda::new(param, predicate),
        }
    }

    pub fn select(self, param: &str, selector: QueryExpr) -> Self {
        Queryable::Select {
            input: Box::new(self),
            selector: Lambda::new(param, selector),
        }
    }

    pub fn order_by(self, param: &str, key: QueryExpr) -> Self {
        self.ordering(param, key, true, false)
    }

    pub fn order_by_desc(self, param: &str, key: QueryExpr) -> Self {
        self.ordering(param, key, false, false)
    }

    pub fn then_by(self, param: &str, key: QueryExpr) -> Self {
        self.ordering(param, key, true, true)
    }

    fn ordering(self, param: &str, key: QueryExpr, ascending: bool, then: bool) -> Self {
        Queryable::OrderBy {
            input: Box::new(self),
            key: Lambda::new(param, key),
            ascending,
            then,
        }
    }

    pub fn skip(self, count: QueryExpr) -> Self {
        Queryable::Skip {
            input: Box::new(self),
            count,
        }
    }

    pub fn take(self, count: QueryExpr) -> Self {
        Queryable::Take {
            input: Box::new(self),
            count,
        }
    }

    pub fn distinct(self) -> Self {
        Queryable::Distinct {
            input: Box::new(self),
        }
    }

    pub fn join(self, inner: Queryable, outer_key: Lambda, inner_key: Lambda, result: Lambda) -> Self {
        Queryable::Join {
            outer: Box::new(self),
            inner: Box::new(inner),
            outer_key,
            inner_key,
            result,
        }
    }

    pub fn group_by(self, key: Lambda, result: Lambda) -> Self {
        Queryable::GroupBy {
            input: Box::new(self),
            key,
            result,
        }
    }

    /// Name of the operation, used in error messages.
    pub fn operation_name(&self) -> &'static str {
        match self {
            Self::Source { .. } => "Source",
            Self::Navigation { .. } => "Navigation",
            Self::Where { .. } => "Where",
            Self::Select { .. } => "Select",
            Self::OrderBy { then: false, .. } => "OrderBy",
            Self::OrderBy { then: true, .. } => "ThenBy",
            Self::Skip { .. } => "Skip",
            Self::Take { .. } => "Take",
            Self::Distinct { .. } => "Distinct",
            Self::Join { .. } => "Join",
            Self::GroupBy { .. } => "GroupBy",
        }
    }
}
