//! Operator syntax for extra-spec requirement values.
//!
//! A requirement is either a bare value (string equality) or an operator
//! followed by operands:
//!
//! | operator   | meaning                                  |
//! |------------|------------------------------------------|
//! | `=`        | numeric, value ≥ operand                 |
//! | `==` `!=` `>=` `<=` | numeric comparison              |
//! | `s==` `s!=` `s>=` `s>` `s<=` `s<` | string comparison |
//! | `<in>`     | operand is a substring of value          |
//! | `<all-in>` | every operand is a substring of value    |
//! | `<or>`     | `<or> a <or> b`: value equals any choice |

/// Does the node-side `value` satisfy the requirement `req`?
pub fn matches(value: &str, req: &str) -> bool {
    let words: Vec<&str> = req.split_whitespace().collect();
    let Some((op, operands)) = words.split_first() else {
        return value == req;
    };

    match *op {
        "<or>" => operands.iter().step_by(2).any(|choice| *choice == value),
        "<in>" => operands.first().is_some_and(|needle| value.contains(needle)),
        "<all-in>" => !operands.is_empty() && operands.iter().all(|needle| value.contains(needle)),
        "=" | "==" | "!=" | ">=" | "<=" => match operands.first() {
            Some(operand) => numeric(op, value, operand),
            None => false,
        },
        "s==" | "s!=" | "s>=" | "s>" | "s<=" | "s<" => match operands.first() {
            Some(operand) => string(op, value, operand),
            None => false,
        },
        _ => value == req,
    }
}

fn numeric(op: &str, value: &str, operand: &str) -> bool {
    let (Ok(value), Ok(operand)) = (value.trim().parse::<f64>(), operand.parse::<f64>()) else {
        return false;
    };
    match op {
        "=" | ">=" => value >= operand,
        "==" => value == operand,
        "!=" => value != operand,
        "<=" => value <= operand,
        _ => false,
    }
}

fn string(op: &str, value: &str, operand: &str) -> bool {
    match op {
        "s==" => value == operand,
        "s!=" => value != operand,
        "s>=" => value >= operand,
        "s>" => value > operand,
        "s<=" => value <= operand,
        "s<" => value < operand,
        _ => false,
    }
}
