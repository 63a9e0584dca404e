use dashu::base::BitTest;
use dashu::integer::IBig;
use dashu::{Integer, Rational};
use num_order::NumOrd;

use crate::atom_table::*;
use crate::forms::*;
use crate::machine::machine_errors::*;
use crate::machine::machine_state::*;
use crate::types::*;

use ordered_float::*;

use std::cmp::Ordering;
use std::f64;
use std::rc::Rc;

/// Largest integer guaranteed to fit a fixnum on every build.
pub(crate) const MAX_TAGGED_INTEGER: i64 = (1 << 60) - 1;

#[derive(Debug, Clone)]
pub(crate) enum Number {
    Fixnum(i64),
    Integer(Rc<Integer>),
    Rational(Rc<Rational>),
    Float(OrderedFloat<f64>),
}

/// Why an evaluation could not produce a number.
#[derive(Debug, Clone)]
pub(crate) enum ArithError {
    Eval(EvalError),
    NotInteger(Number),
}

impl From<EvalError> for ArithError {
    #[inline]
    fn from(err: EvalError) -> Self {
        ArithError::Eval(err)
    }
}

type ArithResult = Result<Number, ArithError>;

impl Number {
    pub(crate) fn from_cell(cell: &Cell) -> Option<Self> {
        match &cell.val {
            Value::Fixnum(n) => Some(Number::Fixnum(*n)),
            Value::Integer(n) => Some(Number::Integer(n.clone())),
            Value::Rational(r) => Some(Number::Rational(r.clone())),
            Value::Float(f) => Some(Number::Float(*f)),
            _ => None,
        }
    }

    pub(crate) fn to_cell(&self) -> Cell {
        match self {
            Number::Fixnum(n) => Cell::fixnum(*n),
            Number::Integer(n) => Cell::integer((**n).clone()),
            Number::Rational(r) => Cell::rational((**r).clone()),
            Number::Float(f) => Cell::float(f.into_inner()),
        }
    }

    pub(crate) fn to_tree(&self) -> Tree {
        match self {
            Number::Fixnum(n) => Tree::Literal(Literal::Fixnum(*n)),
            Number::Integer(n) => Tree::Literal(Literal::Integer(n.clone())),
            Number::Rational(r) => Tree::Literal(Literal::Rational(r.clone())),
            Number::Float(f) => Tree::Literal(Literal::Float(*f)),
        }
    }

    /// Big integers that fit a fixnum are demoted to one.
    pub(crate) fn integer(n: Integer) -> Self {
        match i64::try_from(&n) {
            Ok(n) => Number::Fixnum(n),
            Err(_) => Number::Integer(Rc::new(n)),
        }
    }

    pub(crate) fn rational(r: Rational) -> Self {
        if r.denominator().is_one() {
            let (num, _) = r.into_parts();
            Number::integer(num)
        } else {
            Number::Rational(Rc::new(r))
        }
    }

    pub(crate) fn float(f: f64) -> ArithResult {
        if f.is_nan() {
            Err(EvalError::Undefined.into())
        } else if f.is_infinite() {
            Err(EvalError::FloatOverflow.into())
        } else {
            Ok(Number::Float(OrderedFloat(f)))
        }
    }

    pub(crate) fn to_f64(&self) -> f64 {
        match self {
            Number::Fixnum(n) => *n as f64,
            Number::Integer(n) => n.to_f64().value(),
            Number::Rational(r) => r.to_f64().value(),
            Number::Float(f) => f.into_inner(),
        }
    }

    pub(crate) fn to_integer(&self) -> Option<Integer> {
        match self {
            Number::Fixnum(n) => Some(Integer::from(*n)),
            Number::Integer(n) => Some((**n).clone()),
            _ => None,
        }
    }

    fn to_rational(&self) -> Option<Rational> {
        match self {
            Number::Fixnum(n) => Some(Rational::from(Integer::from(*n))),
            Number::Integer(n) => Some(Rational::from((**n).clone())),
            Number::Rational(r) => Some((**r).clone()),
            Number::Float(_) => None,
        }
    }

    #[inline]
    fn is_float(&self) -> bool {
        matches!(self, Number::Float(_))
    }

    #[inline]
    fn is_rational(&self) -> bool {
        matches!(self, Number::Rational(_))
    }

    fn is_zero(&self) -> bool {
        match self {
            Number::Fixnum(n) => *n == 0,
            Number::Integer(n) => **n == IBig::ZERO,
            Number::Rational(_) => false,
            Number::Float(f) => f.into_inner() == 0.0,
        }
    }

    fn is_negative(&self) -> bool {
        match self {
            Number::Fixnum(n) => *n < 0,
            Number::Integer(n) => **n < IBig::ZERO,
            Number::Rational(r) => *r.numerator() < IBig::ZERO,
            Number::Float(f) => f.into_inner() < 0.0,
        }
    }
}

/// Numeric comparison across representations. Mixed integer and float
/// comparisons go through the float.
pub(crate) fn num_cmp(n1: &Number, n2: &Number) -> Ordering {
    match (n1, n2) {
        (Number::Fixnum(n1), Number::Fixnum(n2)) => n1.cmp(n2),
        (Number::Fixnum(n1), Number::Integer(n2)) => Integer::from(*n1).cmp(n2),
        (Number::Integer(n1), Number::Fixnum(n2)) => (**n1).cmp(&Integer::from(*n2)),
        (Number::Integer(n1), Number::Integer(n2)) => n1.cmp(n2),
        (Number::Fixnum(n1), Number::Rational(n2)) => Integer::from(*n1)
            .num_partial_cmp(&**n2)
            .unwrap_or(Ordering::Less),
        (Number::Rational(n1), Number::Fixnum(n2)) => (**n1)
            .num_partial_cmp(&Integer::from(*n2))
            .unwrap_or(Ordering::Less),
        (Number::Integer(n1), Number::Rational(n2)) => {
            (**n1).num_partial_cmp(&**n2).unwrap_or(Ordering::Less)
        }
        (Number::Rational(n1), Number::Integer(n2)) => {
            (**n1).num_partial_cmp(&**n2).unwrap_or(Ordering::Less)
        }
        (Number::Rational(r1), Number::Rational(r2)) => r1.cmp(r2),
        (Number::Float(f1), Number::Float(f2)) => f1.cmp(f2),
        (Number::Float(f1), n2) => f1.cmp(&OrderedFloat(n2.to_f64())),
        (n1, Number::Float(f2)) => OrderedFloat(n1.to_f64()).cmp(f2),
    }
}

fn binary_op(
    n1: &Number,
    n2: &Number,
    fixnum_op: fn(i64, i64) -> Option<i64>,
    int_op: fn(Integer, Integer) -> Integer,
    rat_op: fn(Rational, Rational) -> Rational,
    float_op: fn(f64, f64) -> f64,
) -> ArithResult {
    if n1.is_float() || n2.is_float() {
        return Number::float(float_op(n1.to_f64(), n2.to_f64()));
    }

    if n1.is_rational() || n2.is_rational() {
        return match (n1.to_rational(), n2.to_rational()) {
            (Some(r1), Some(r2)) => Ok(Number::rational(rat_op(r1, r2))),
            _ => Err(EvalError::Undefined.into()),
        };
    }

    if let (Number::Fixnum(i1), Number::Fixnum(i2)) = (n1, n2) {
        if let Some(n) = fixnum_op(*i1, *i2) {
            return Ok(Number::Fixnum(n));
        }
    }

    match (n1.to_integer(), n2.to_integer()) {
        (Some(i1), Some(i2)) => Ok(Number::integer(int_op(i1, i2))),
        _ => Err(EvalError::Undefined.into()),
    }
}

pub(crate) fn add(n1: &Number, n2: &Number) -> ArithResult {
    binary_op(n1, n2, i64::checked_add, |a, b| a + b, |a, b| a + b, |a, b| a + b)
}

pub(crate) fn sub(n1: &Number, n2: &Number) -> ArithResult {
    binary_op(n1, n2, i64::checked_sub, |a, b| a - b, |a, b| a - b, |a, b| a - b)
}

pub(crate) fn mul(n1: &Number, n2: &Number) -> ArithResult {
    binary_op(n1, n2, i64::checked_mul, |a, b| a * b, |a, b| a * b, |a, b| a * b)
}

pub(crate) fn neg(n: &Number) -> ArithResult {
    match n {
        Number::Fixnum(n) => Ok(n
            .checked_neg()
            .map(Number::Fixnum)
            .unwrap_or_else(|| Number::integer(-Integer::from(*n)))),
        Number::Integer(n) => Ok(Number::integer(-(**n).clone())),
        Number::Rational(r) => Ok(Number::rational(-(**r).clone())),
        Number::Float(f) => Number::float(-f.into_inner()),
    }
}

pub(crate) fn abs(n: &Number) -> ArithResult {
    if n.is_negative() {
        neg(n)
    } else {
        Ok(n.clone())
    }
}

pub(crate) fn sign(n: &Number) -> ArithResult {
    match n {
        Number::Float(f) => {
            let f = f.into_inner();
            Number::float(if f > 0.0 { 1.0 } else if f < 0.0 { -1.0 } else { 0.0 })
        }
        n if n.is_zero() => Ok(Number::Fixnum(0)),
        n if n.is_negative() => Ok(Number::Fixnum(-1)),
        _ => Ok(Number::Fixnum(1)),
    }
}

/// `/`: exact on integers when the division is, a float otherwise.
pub(crate) fn div(n1: &Number, n2: &Number) -> ArithResult {
    if n2.is_zero() {
        return Err(EvalError::ZeroDivisor.into());
    }

    if n1.is_float() || n2.is_float() {
        return Number::float(n1.to_f64() / n2.to_f64());
    }

    if n1.is_rational() || n2.is_rational() {
        return match (n1.to_rational(), n2.to_rational()) {
            (Some(r1), Some(r2)) => Ok(Number::rational(r1 / r2)),
            _ => Err(EvalError::Undefined.into()),
        };
    }

    let (i1, i2) = integers(n1, n2)?;

    if (&i1 % &i2) == IBig::ZERO {
        Ok(Number::integer(i1 / i2))
    } else {
        Number::float(n1.to_f64() / n2.to_f64())
    }
}

pub(crate) fn rdiv(n1: &Number, n2: &Number) -> ArithResult {
    if n2.is_zero() {
        return Err(EvalError::ZeroDivisor.into());
    }

    match (n1.to_rational(), n2.to_rational()) {
        (Some(r1), Some(r2)) => Ok(Number::rational(r1 / r2)),
        (None, _) => Err(ArithError::NotInteger(n1.clone())),
        (_, None) => Err(ArithError::NotInteger(n2.clone())),
    }
}

fn integers(n1: &Number, n2: &Number) -> Result<(Integer, Integer), ArithError> {
    let i1 = n1
        .to_integer()
        .ok_or_else(|| ArithError::NotInteger(n1.clone()))?;
    let i2 = n2
        .to_integer()
        .ok_or_else(|| ArithError::NotInteger(n2.clone()))?;

    Ok((i1, i2))
}

fn integer_divisor(n1: &Number, n2: &Number) -> Result<(Integer, Integer), ArithError> {
    let (i1, i2) = integers(n1, n2)?;

    if i2 == IBig::ZERO {
        return Err(EvalError::ZeroDivisor.into());
    }

    Ok((i1, i2))
}

/// `//`: truncating integer division.
pub(crate) fn idiv(n1: &Number, n2: &Number) -> ArithResult {
    let (i1, i2) = integer_divisor(n1, n2)?;
    Ok(Number::integer(i1 / i2))
}

/// `rem`: remainder with the sign of the dividend.
pub(crate) fn remainder(n1: &Number, n2: &Number) -> ArithResult {
    let (i1, i2) = integer_divisor(n1, n2)?;
    Ok(Number::integer(i1 % i2))
}

/// `mod`: remainder with the sign of the divisor.
pub(crate) fn modulus(n1: &Number, n2: &Number) -> ArithResult {
    let (i1, i2) = integer_divisor(n1, n2)?;
    let r = &i1 % &i2;

    if r != IBig::ZERO && (r < IBig::ZERO) != (i2 < IBig::ZERO) {
        Ok(Number::integer(r + i2))
    } else {
        Ok(Number::integer(r))
    }
}

/// `div`: flooring integer division.
pub(crate) fn int_floor_div(n1: &Number, n2: &Number) -> ArithResult {
    let m = modulus(n1, n2)?;
    let n1 = sub(n1, &m)?;

    idiv(&n1, n2)
}

fn exponent(n: &Integer) -> Result<usize, ArithError> {
    usize::try_from(n).map_err(|_| ArithError::Eval(EvalError::IntOverflow))
}

fn int_pow(base: Integer, power: Integer) -> ArithResult {
    if power < IBig::ZERO {
        return if base == IBig::ONE {
            Ok(Number::Fixnum(1))
        } else if base == -IBig::ONE {
            let odd = (&power % IBig::from(2)) != IBig::ZERO;
            Ok(Number::Fixnum(if odd { -1 } else { 1 }))
        } else if base == IBig::ZERO {
            Err(EvalError::ZeroDivisor.into())
        } else {
            Err(EvalError::Undefined.into())
        };
    }

    Ok(Number::integer(base.pow(exponent(&power)?)))
}

/// `^`: integer power on integers, float power otherwise.
pub(crate) fn pow(n1: &Number, n2: &Number) -> ArithResult {
    match (n1.to_integer(), n2.to_integer()) {
        (Some(base), Some(power)) => int_pow(base, power),
        _ => float_pow(n1, n2),
    }
}

/// `**`: float power, except for integers raised to a natural power.
pub(crate) fn float_pow(n1: &Number, n2: &Number) -> ArithResult {
    if let (Some(base), Some(power)) = (n1.to_integer(), n2.to_integer()) {
        if power >= IBig::ZERO {
            return int_pow(base, power);
        }
    }

    if n1.is_zero() && n2.is_negative() {
        return Err(EvalError::ZeroDivisor.into());
    }

    Number::float(n1.to_f64().powf(n2.to_f64()))
}

pub(crate) fn min(n1: &Number, n2: &Number) -> Number {
    match num_cmp(n1, n2) {
        Ordering::Greater => n2.clone(),
        _ => n1.clone(),
    }
}

pub(crate) fn max(n1: &Number, n2: &Number) -> Number {
    match num_cmp(n1, n2) {
        Ordering::Less => n2.clone(),
        _ => n1.clone(),
    }
}

fn shift_amount(n: &Number) -> Result<usize, ArithError> {
    let n = n
        .to_integer()
        .ok_or_else(|| ArithError::NotInteger(n.clone()))?;

    exponent(&n)
}

pub(crate) fn shl(n1: &Number, n2: &Number) -> ArithResult {
    if n2.is_negative() {
        return shr(n1, &neg(n2)?);
    }

    let i1 = n1
        .to_integer()
        .ok_or_else(|| ArithError::NotInteger(n1.clone()))?;

    Ok(Number::integer(i1 << shift_amount(n2)?))
}

pub(crate) fn shr(n1: &Number, n2: &Number) -> ArithResult {
    if n2.is_negative() {
        return shl(n1, &neg(n2)?);
    }

    let i1 = n1
        .to_integer()
        .ok_or_else(|| ArithError::NotInteger(n1.clone()))?;

    Ok(Number::integer(i1 >> shift_amount(n2)?))
}

pub(crate) fn and(n1: &Number, n2: &Number) -> ArithResult {
    let (i1, i2) = integers(n1, n2)?;
    Ok(Number::integer(i1 & i2))
}

pub(crate) fn or(n1: &Number, n2: &Number) -> ArithResult {
    let (i1, i2) = integers(n1, n2)?;
    Ok(Number::integer(i1 | i2))
}

pub(crate) fn xor(n1: &Number, n2: &Number) -> ArithResult {
    let (i1, i2) = integers(n1, n2)?;
    Ok(Number::integer(i1 ^ i2))
}

pub(crate) fn bitwise_complement(n: &Number) -> ArithResult {
    match n {
        Number::Fixnum(n) => Ok(Number::Fixnum(!n)),
        Number::Integer(n) => Ok(Number::integer(!(**n).clone())),
        _ => Err(ArithError::NotInteger(n.clone())),
    }
}

pub(crate) fn msb(n: &Number) -> ArithResult {
    let i = n
        .to_integer()
        .ok_or_else(|| ArithError::NotInteger(n.clone()))?;

    if i <= IBig::ZERO {
        return Err(EvalError::Undefined.into());
    }

    Ok(Number::Fixnum(i.bit_len() as i64 - 1))
}

pub(crate) fn gcd(n1: &Number, n2: &Number) -> ArithResult {
    let (mut a, mut b) = integers(n1, n2)?;

    while b != IBig::ZERO {
        let r = &a % &b;
        a = b;
        b = r;
    }

    abs(&Number::integer(a))
}

/// Truncates a finite float to an integer, exactly.
pub(crate) fn float_to_integer(f: f64) -> Result<Integer, ArithError> {
    if f.is_nan() {
        return Err(EvalError::Undefined.into());
    }

    if f.is_infinite() {
        return Err(EvalError::IntOverflow.into());
    }

    let f = f.trunc();

    if f.abs() < 9.0e18 {
        return Ok(Integer::from(f as i64));
    }

    let bits = f.to_bits();
    let exponent = ((bits >> 52) & 0x7ff) as usize;
    let mantissa = (bits & 0x000f_ffff_ffff_ffff) | 0x0010_0000_0000_0000;
    let n = Integer::from(mantissa) << (exponent - 1075);

    Ok(if f < 0.0 { -n } else { n })
}

fn rounded(n: &Number, round: fn(f64) -> f64) -> ArithResult {
    match n {
        Number::Fixnum(_) | Number::Integer(_) => Ok(n.clone()),
        Number::Rational(_) | Number::Float(_) => {
            Ok(Number::integer(float_to_integer(round(n.to_f64()))?))
        }
    }
}

pub(crate) fn truncate(n: &Number) -> ArithResult {
    match n {
        Number::Rational(r) => {
            let num = r.numerator().clone();
            let den = IBig::from(r.denominator().clone());

            Ok(Number::integer(num / den))
        }
        _ => rounded(n, f64::trunc),
    }
}

pub(crate) fn floor(n: &Number) -> ArithResult {
    rounded(n, f64::floor)
}

pub(crate) fn ceiling(n: &Number) -> ArithResult {
    rounded(n, f64::ceil)
}

pub(crate) fn round(n: &Number) -> ArithResult {
    rounded(n, f64::round)
}

fn unary_float(n: &Number, f: fn(f64) -> f64) -> ArithResult {
    Number::float(f(n.to_f64()))
}

fn checked_float(n: &Number, domain: fn(f64) -> bool, f: fn(f64) -> f64) -> ArithResult {
    let x = n.to_f64();

    if domain(x) {
        Number::float(f(x))
    } else {
        Err(EvalError::Undefined.into())
    }
}

/// Applies the evaluable functor `name/arity` to evaluated arguments.
/// `None` means the functor is not evaluable.
pub(crate) fn apply(name: &str, args: &[Number]) -> Option<ArithResult> {
    let result = match (name, args) {
        ("+", [n1, n2]) => add(n1, n2),
        ("-", [n1, n2]) => sub(n1, n2),
        ("*", [n1, n2]) => mul(n1, n2),
        ("/", [n1, n2]) => div(n1, n2),
        ("//", [n1, n2]) => idiv(n1, n2),
        ("rem", [n1, n2]) => remainder(n1, n2),
        ("mod", [n1, n2]) => modulus(n1, n2),
        ("div", [n1, n2]) => int_floor_div(n1, n2),
        ("rdiv", [n1, n2]) => rdiv(n1, n2),
        ("min", [n1, n2]) => Ok(min(n1, n2)),
        ("max", [n1, n2]) => Ok(max(n1, n2)),
        ("^", [n1, n2]) => pow(n1, n2),
        ("**", [n1, n2]) => float_pow(n1, n2),
        (">>", [n1, n2]) => shr(n1, n2),
        ("<<", [n1, n2]) => shl(n1, n2),
        ("/\\", [n1, n2]) => and(n1, n2),
        ("\\/", [n1, n2]) => or(n1, n2),
        ("xor", [n1, n2]) => xor(n1, n2),
        ("gcd", [n1, n2]) => gcd(n1, n2),
        ("atan2", [n1, n2]) | ("atan", [n1, n2]) => {
            if n1.is_zero() && n2.is_zero() {
                Err(EvalError::Undefined.into())
            } else {
                Number::float(n1.to_f64().atan2(n2.to_f64()))
            }
        }
        ("log", [n1, n2]) => {
            let (b, x) = (n1.to_f64(), n2.to_f64());

            if b <= 0.0 || x <= 0.0 || b == 1.0 {
                Err(EvalError::Undefined.into())
            } else {
                Number::float(x.ln() / b.ln())
            }
        }
        ("-", [n]) => neg(n),
        ("+", [n]) => Ok(n.clone()),
        ("abs", [n]) => abs(n),
        ("sign", [n]) => sign(n),
        ("\\", [n]) => bitwise_complement(n),
        ("msb", [n]) => msb(n),
        ("sqrt", [n]) => checked_float(n, |x| x >= 0.0, f64::sqrt),
        ("log", [n]) => checked_float(n, |x| x > 0.0, f64::ln),
        ("exp", [n]) => unary_float(n, f64::exp),
        ("sin", [n]) => unary_float(n, f64::sin),
        ("cos", [n]) => unary_float(n, f64::cos),
        ("tan", [n]) => unary_float(n, f64::tan),
        ("asin", [n]) => checked_float(n, |x| (-1.0..=1.0).contains(&x), f64::asin),
        ("acos", [n]) => checked_float(n, |x| (-1.0..=1.0).contains(&x), f64::acos),
        ("atan", [n]) => unary_float(n, f64::atan),
        ("sinh", [n]) => unary_float(n, f64::sinh),
        ("cosh", [n]) => unary_float(n, f64::cosh),
        ("tanh", [n]) => unary_float(n, f64::tanh),
        ("float", [n]) => Number::float(n.to_f64()),
        ("float_integer_part", [n]) => unary_float(n, f64::trunc),
        ("float_fractional_part", [n]) => unary_float(n, f64::fract),
        ("integer", [n]) => round(n),
        ("truncate", [n]) => truncate(n),
        ("floor", [n]) => floor(n),
        ("ceiling", [n]) => ceiling(n),
        ("round", [n]) => round(n),
        _ => return None,
    };

    Some(result)
}

/// Evaluable atoms.
pub(crate) fn constant(name: Atom) -> Option<Number> {
    let n = match name {
        atom!("pi") => Number::Float(OrderedFloat(f64::consts::PI)),
        atom!("e") => Number::Float(OrderedFloat(f64::consts::E)),
        atom!("inf") | atom!("infinite") => Number::Float(OrderedFloat(f64::INFINITY)),
        atom!("nan") => Number::Float(OrderedFloat(f64::NAN)),
        atom!("epsilon") => Number::Float(OrderedFloat(f64::EPSILON)),
        atom!("max_tagged_integer") => Number::Fixnum(MAX_TAGGED_INTEGER),
        _ => return None,
    };

    Some(n)
}

enum EvalStep {
    Eval(Deref),
    Apply(Atom, usize),
}

impl MachineState {
    fn arith_error(&self, err: ArithError) -> MachineError {
        match err {
            ArithError::Eval(err) => self.evaluation_error(err),
            ArithError::NotInteger(n) => self.type_error_tree(ValidType::Integer, n.to_tree()),
        }
    }

    /// Evaluates an arithmetic expression over an explicit work stack.
    pub(crate) fn eval(&self, term: &Deref) -> Result<Number, MachineError> {
        let mut work = vec![EvalStep::Eval(term.clone())];
        let mut values: Vec<Number> = vec![];

        while let Some(step) = work.pop() {
            match step {
                EvalStep::Eval(term) => match self.deref(&term) {
                    Deref::Var(_) => return Err(self.instantiation_error()),
                    Deref::Const(cell) => {
                        if let Some(n) = Number::from_cell(&cell) {
                            values.push(n);
                            continue;
                        }

                        let culprit = match cell.name() {
                            Some(name) => match constant(name) {
                                Some(n) => {
                                    values.push(n);
                                    continue;
                                }
                                None => Tree::indicator((name, 0)),
                            },
                            None => self.export_culprit(&Deref::Const(cell)),
                        };

                        return Err(self.type_error_tree(ValidType::Evaluable, culprit));
                    }
                    Deref::Struct(loc, ctx) => {
                        let (name, arity) = match self.cell(&loc).key() {
                            Some(key) => key,
                            None => {
                                let term = Deref::Struct(loc, ctx);
                                return Err(self.type_error(ValidType::Evaluable, &term));
                            }
                        };

                        work.push(EvalStep::Apply(name, arity));

                        for arg in self.arg_locs(&loc).iter().rev() {
                            work.push(EvalStep::Eval(self.deref_loc(arg, ctx)));
                        }
                    }
                },
                EvalStep::Apply(name, arity) => {
                    let args = values.split_off(values.len().saturating_sub(arity));
                    let text = self.db.atom_name(name);

                    match apply(&text, &args) {
                        Some(Ok(n)) => values.push(n),
                        Some(Err(err)) => return Err(self.arith_error(err)),
                        None => {
                            return Err(self.type_error_tree(
                                ValidType::Evaluable,
                                Tree::indicator((name, arity)),
                            ))
                        }
                    }
                }
            }
        }

        values
            .pop()
            .ok_or_else(|| self.type_error(ValidType::Evaluable, term))
    }

    /// `=:=`, `<` and friends.
    pub(crate) fn compare_numbers(&self, ord: fn(Ordering) -> bool) -> CallResult {
        let n1 = self.eval(&self.arg(0))?;
        let n2 = self.eval(&self.arg(1))?;

        Ok(ord(num_cmp(&n1, &n2)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(n: i64) -> Number {
        Number::Fixnum(n)
    }

    fn as_i64(n: &Number) -> i64 {
        match n {
            Number::Fixnum(n) => *n,
            _ => panic!("expected a fixnum, got {n:?}"),
        }
    }

    #[test]
    fn fixnum_overflow_promotes() {
        let n = add(&int(i64::MAX), &int(1)).unwrap();
        assert!(matches!(n, Number::Integer(_)));

        let back = sub(&n, &int(1)).unwrap();
        assert_eq!(as_i64(&back), i64::MAX);
    }

    #[test]
    fn division_flavours() {
        assert_eq!(as_i64(&idiv(&int(-7), &int(2)).unwrap()), -3);
        assert_eq!(as_i64(&int_floor_div(&int(-7), &int(2)).unwrap()), -4);
        assert_eq!(as_i64(&modulus(&int(-7), &int(2)).unwrap()), 1);
        assert_eq!(as_i64(&remainder(&int(-7), &int(2)).unwrap()), -1);
        assert_eq!(as_i64(&div(&int(6), &int(2)).unwrap()), 3);

        match div(&int(7), &int(2)).unwrap() {
            Number::Float(f) => assert_eq!(f.into_inner(), 3.5),
            n => panic!("expected a float, got {n:?}"),
        }

        assert!(matches!(
            idiv(&int(1), &int(0)),
            Err(ArithError::Eval(EvalError::ZeroDivisor))
        ));
    }

    #[test]
    fn most_significant_bit() {
        assert_eq!(as_i64(&msb(&int(1)).unwrap()), 0);
        assert_eq!(as_i64(&msb(&int(1000)).unwrap()), 9);
        assert_eq!(as_i64(&msb(&pow(&int(2), &int(100)).unwrap()).unwrap()), 100);
        assert!(matches!(msb(&int(0)), Err(ArithError::Eval(EvalError::Undefined))));
    }

    #[test]
    fn mixed_comparison() {
        assert_eq!(
            num_cmp(&int(1), &Number::Float(OrderedFloat(1.5))),
            Ordering::Less
        );
        assert_eq!(
            num_cmp(&rdiv(&int(1), &int(3)).unwrap(), &int(0)),
            Ordering::Greater
        );
    }

    #[test]
    fn integer_power_and_errors() {
        assert_eq!(as_i64(&pow(&int(2), &int(10)).unwrap()), 1024);
        assert!(matches!(pow(&int(2), &int(100)).unwrap(), Number::Integer(_)));
        assert!(matches!(
            checked_float(&int(-1), |x| x >= 0.0, f64::sqrt),
            Err(ArithError::Eval(EvalError::Undefined))
        ));
        assert!(matches!(
            and(&int(1), &Number::Float(OrderedFloat(1.0))),
            Err(ArithError::NotInteger(_))
        ));
    }

    #[test]
    fn large_floats_truncate_exactly() {
        let n = float_to_integer(1.0e20).unwrap();
        assert_eq!(n.to_string(), "100000000000000000000");
        assert_eq!(float_to_integer(-2.5).unwrap(), Integer::from(-2));
    }
}
