//! Requirement expressions attached to orders.
//!
//! A requirement is a small boolean expression over named attributes, e.g.
//! `location=="site-b" && vcpu>=2`. The scheduler evaluates it against a
//! partial context: comparisons over attributes the context does not know
//! are treated as satisfied, so a requirement only ever narrows the
//! candidate set on the attributes it actually mentions.

use std::collections::HashMap;
use std::fmt;

pub const LOCATION_ATTRIBUTE: &str = "location";

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
	Int(i64),
	Str(String),
}

impl fmt::Display for Value {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Value::Int(i) => write!(f, "{}", i),
			Value::Str(s) => write!(f, "\"{}\"", s),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
	Eq,
	Ne,
	Ge,
	Le,
	Gt,
	Lt,
}

#[derive(Debug, Clone)]
enum Expr {
	Compare {
		attribute: String,
		op: CompareOp,
		value: Value,
	},
	And(Box<Expr>, Box<Expr>),
	Or(Box<Expr>, Box<Expr>),
}

/// A parsed requirement expression.
#[derive(Debug, Clone)]
pub struct Requirements {
	expr: Expr,
}

impl Requirements {
	pub fn parse(raw: &str) -> Result<Self, String> {
		let tokens = tokenize(raw)?;
		let mut parser = Parser { tokens, pos: 0 };
		let expr = parser.parse_or()?;
		if parser.pos != parser.tokens.len() {
			return Err(format!("trailing input after expression in {:?}", raw));
		}
		Ok(Self { expr })
	}

	/// Evaluates against a partial context. Unknown attributes satisfy
	/// their comparison.
	pub fn eval(&self, context: &HashMap<String, Value>) -> bool {
		eval_expr(&self.expr, context)
	}

	/// Whether the expression mentions the given attribute at all.
	pub fn mentions(&self, attribute: &str) -> bool {
		mentions(&self.expr, attribute)
	}

	/// The smallest integer literal compared against `attribute`, if any.
	/// Used to size wake-up requests for sleeping hosts.
	pub fn minimum_for(&self, attribute: &str) -> Option<i64> {
		let mut smallest = None;
		collect_minimum(&self.expr, attribute, &mut smallest);
		smallest
	}

	/// Whether a peer with the given member id satisfies the location
	/// clauses, if any.
	pub fn accepts_location(&self, member_id: &str) -> bool {
		if !self.mentions(LOCATION_ATTRIBUTE) {
			return true;
		}
		let mut context = HashMap::new();
		context.insert(
			LOCATION_ATTRIBUTE.to_string(),
			Value::Str(member_id.to_string()),
		);
		self.eval(&context)
	}
}

fn eval_expr(expr: &Expr, context: &HashMap<String, Value>) -> bool {
	match expr {
		Expr::And(left, right) => eval_expr(left, context) && eval_expr(right, context),
		Expr::Or(left, right) => eval_expr(left, context) || eval_expr(right, context),
		Expr::Compare {
			attribute,
			op,
			value,
		} => match context.get(attribute) {
			None => true,
			Some(actual) => compare(actual, *op, value),
		},
	}
}

fn compare(actual: &Value, op: CompareOp, wanted: &Value) -> bool {
	match (actual, wanted) {
		(Value::Int(a), Value::Int(b)) => match op {
			CompareOp::Eq => a == b,
			CompareOp::Ne => a != b,
			CompareOp::Ge => a >= b,
			CompareOp::Le => a <= b,
			CompareOp::Gt => a > b,
			CompareOp::Lt => a < b,
		},
		(Value::Str(a), Value::Str(b)) => match op {
			CompareOp::Eq => a == b,
			CompareOp::Ne => a != b,
			// Ordered comparison over strings is lexicographic.
			CompareOp::Ge => a >= b,
			CompareOp::Le => a <= b,
			CompareOp::Gt => a > b,
			CompareOp::Lt => a < b,
		},
		// Mixed types never match equality and never satisfy an order.
		_ => op == CompareOp::Ne,
	}
}

fn collect_minimum(expr: &Expr, attribute: &str, smallest: &mut Option<i64>) {
	match expr {
		Expr::Compare {
			attribute: a,
			value: Value::Int(value),
			..
		} if a == attribute => {
			if smallest.map(|current| *value < current).unwrap_or(true) {
				*smallest = Some(*value);
			}
		}
		Expr::Compare { .. } => {}
		Expr::And(left, right) | Expr::Or(left, right) => {
			collect_minimum(left, attribute, smallest);
			collect_minimum(right, attribute, smallest);
		}
	}
}

fn mentions(expr: &Expr, attribute: &str) -> bool {
	match expr {
		Expr::Compare { attribute: a, .. } => a == attribute,
		Expr::And(left, right) | Expr::Or(left, right) => {
			mentions(left, attribute) || mentions(right, attribute)
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
	Ident(String),
	Value(Value),
	Op(CompareOp),
	And,
	Or,
	LParen,
	RParen,
}

fn tokenize(raw: &str) -> Result<Vec<Token>, String> {
	let mut tokens = Vec::new();
	let chars: Vec<char> = raw.chars().collect();
	let mut i = 0;
	while i < chars.len() {
		let c = chars[i];
		match c {
			' ' | '\t' | '\n' => i += 1,
			'(' => {
				tokens.push(Token::LParen);
				i += 1;
			}
			')' => {
				tokens.push(Token::RParen);
				i += 1;
			}
			'&' => {
				if chars.get(i + 1) == Some(&'&') {
					tokens.push(Token::And);
					i += 2;
				} else {
					return Err("expected '&&'".to_string());
				}
			}
			'|' => {
				if chars.get(i + 1) == Some(&'|') {
					tokens.push(Token::Or);
					i += 2;
				} else {
					return Err("expected '||'".to_string());
				}
			}
			'=' => {
				if chars.get(i + 1) == Some(&'=') {
					tokens.push(Token::Op(CompareOp::Eq));
					i += 2;
				} else {
					return Err("expected '=='".to_string());
				}
			}
			'!' => {
				if chars.get(i + 1) == Some(&'=') {
					tokens.push(Token::Op(CompareOp::Ne));
					i += 2;
				} else {
					return Err("expected '!='".to_string());
				}
			}
			'>' => {
				if chars.get(i + 1) == Some(&'=') {
					tokens.push(Token::Op(CompareOp::Ge));
					i += 2;
				} else {
					tokens.push(Token::Op(CompareOp::Gt));
					i += 1;
				}
			}
			'<' => {
				if chars.get(i + 1) == Some(&'=') {
					tokens.push(Token::Op(CompareOp::Le));
					i += 2;
				} else {
					tokens.push(Token::Op(CompareOp::Lt));
					i += 1;
				}
			}
			'"' => {
				let mut value = String::new();
				i += 1;
				while i < chars.len() && chars[i] != '"' {
					value.push(chars[i]);
					i += 1;
				}
				if i == chars.len() {
					return Err("unterminated string literal".to_string());
				}
				i += 1;
				tokens.push(Token::Value(Value::Str(value)));
			}
			c if c.is_ascii_digit() || c == '-' => {
				let mut raw_number = String::new();
				raw_number.push(c);
				i += 1;
				while i < chars.len() && chars[i].is_ascii_digit() {
					raw_number.push(chars[i]);
					i += 1;
				}
				let number = raw_number
					.parse::<i64>()
					.map_err(|_| format!("bad number literal {:?}", raw_number))?;
				tokens.push(Token::Value(Value::Int(number)));
			}
			c if c.is_ascii_alphabetic() || c == '_' => {
				let mut ident = String::new();
				while i < chars.len()
					&& (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '-')
				{
					ident.push(chars[i]);
					i += 1;
				}
				tokens.push(Token::Ident(ident));
			}
			other => return Err(format!("unexpected character {:?}", other)),
		}
	}
	Ok(tokens)
}

struct Parser {
	tokens: Vec<Token>,
	pos: usize,
}

impl Parser {
	fn parse_or(&mut self) -> Result<Expr, String> {
		let mut expr = self.parse_and()?;
		while self.peek() == Some(&Token::Or) {
			self.pos += 1;
			let right = self.parse_and()?;
			expr = Expr::Or(Box::new(expr), Box::new(right));
		}
		Ok(expr)
	}

	fn parse_and(&mut self) -> Result<Expr, String> {
		let mut expr = self.parse_atom()?;
		while self.peek() == Some(&Token::And) {
			self.pos += 1;
			let right = self.parse_atom()?;
			expr = Expr::And(Box::new(expr), Box::new(right));
		}
		Ok(expr)
	}

	fn parse_atom(&mut self) -> Result<Expr, String> {
		match self.next() {
			Some(Token::LParen) => {
				let expr = self.parse_or()?;
				match self.next() {
					Some(Token::RParen) => Ok(expr),
					_ => Err("expected ')'".to_string()),
				}
			}
			Some(Token::Ident(attribute)) => {
				let op = match self.next() {
					Some(Token::Op(op)) => op,
					_ => return Err("expected comparison operator".to_string()),
				};
				let value = match self.next() {
					Some(Token::Value(value)) => value,
					_ => return Err("expected literal".to_string()),
				};
				Ok(Expr::Compare {
					attribute,
					op,
					value,
				})
			}
			other => Err(format!("unexpected token {:?}", other)),
		}
	}

	fn peek(&self) -> Option<&Token> {
		self.tokens.get(self.pos)
	}

	fn next(&mut self) -> Option<Token> {
		let token = self.tokens.get(self.pos).cloned();
		if token.is_some() {
			self.pos += 1;
		}
		token
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn context(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
		pairs
			.iter()
			.map(|(k, v)| (k.to_string(), v.clone()))
			.collect()
	}

	#[test]
	fn evaluates_comparisons_and_boolean_operators() {
		let req = Requirements::parse("vcpu>=2 && mem>1024").unwrap();
		assert!(req.eval(&context(&[("vcpu", Value::Int(4)), ("mem", Value::Int(2048))])));
		assert!(!req.eval(&context(&[("vcpu", Value::Int(1)), ("mem", Value::Int(2048))])));

		let req = Requirements::parse("vcpu>=8 || mem>=1024").unwrap();
		assert!(req.eval(&context(&[("vcpu", Value::Int(1)), ("mem", Value::Int(1024))])));
	}

	#[test]
	fn unknown_attributes_are_satisfied() {
		let req = Requirements::parse("vcpu>=2 && disk>=100").unwrap();
		assert!(req.eval(&context(&[("vcpu", Value::Int(2))])));
	}

	#[test]
	fn location_clause_filters_members() {
		let req = Requirements::parse("location==\"site-b\" && vcpu>=2").unwrap();
		assert!(req.accepts_location("site-b"));
		assert!(!req.accepts_location("site-c"));

		let req = Requirements::parse("vcpu>=2").unwrap();
		assert!(req.accepts_location("anywhere"));
	}

	#[test]
	fn parenthesized_expressions() {
		let req = Requirements::parse("(location==\"a\" || location==\"b\") && vcpu>=1").unwrap();
		assert!(req.accepts_location("b"));
		assert!(!req.accepts_location("c"));
	}

	#[test]
	fn minimum_literal_extraction() {
		let req = Requirements::parse("vcpu>=2 || vcpu>=8 && mem>=1024").unwrap();
		assert_eq!(req.minimum_for("vcpu"), Some(2));
		assert_eq!(req.minimum_for("mem"), Some(1024));
		assert_eq!(req.minimum_for("disk"), None);
	}

	#[test]
	fn rejects_malformed_expressions() {
		assert!(Requirements::parse("vcpu >").is_err());
		assert!(Requirements::parse("vcpu = 2").is_err());
		assert!(Requirements::parse("location==\"unterminated").is_err());
		assert!(Requirements::parse("vcpu>=2 extra").is_err());
	}
}
