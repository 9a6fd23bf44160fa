//! Restricted compiler: structural validation before anything runs
//!
//! The validator walks the syntax tree once and rejects every construct
//! outside the allowed grammar. It never evaluates any part of the code.
//! The only way to obtain an [`ExecutableUnit`] is through [`validate`].

use crate::ast::{Comprehension, Expr, FunctionDef, Program, Stmt, StmtKind};
use crate::capabilities::{is_allowed_attribute, is_forbidden_name};
use crate::lexer::SyntaxError;
use crate::parser::parse;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("SyntaxError: {message} (line {line})")]
    Syntax { line: usize, message: String },

    #[error("Forbidden construct: {construct} (line {line})")]
    Forbidden { construct: String, line: usize },
}

impl From<SyntaxError> for ValidationError {
    fn from(err: SyntaxError) -> Self {
        ValidationError::Syntax {
            line: err.line,
            message: err.message,
        }
    }
}

/// A program that passed validation.
#[derive(Debug)]
pub struct ExecutableUnit {
    program: Program,
}

impl ExecutableUnit {
    pub(crate) fn program(&self) -> &Program {
        &self.program
    }

    pub fn statement_count(&self) -> usize {
        self.program.body.len()
    }
}

type VResult = Result<(), ValidationError>;

/// Parse and validate `code`. Empty code is valid.
pub fn validate(code: &str) -> Result<ExecutableUnit, ValidationError> {
    let program = parse(code)?;
    let mut validator = Validator::default();
    validator.block(&program.body)?;
    tracing::debug!(statements = program.body.len(), "code validated");
    Ok(ExecutableUnit { program })
}

#[derive(Default)]
struct Validator {
    in_function: bool,
    loop_depth: usize,
    line: usize,
}

impl Validator {
    fn forbidden(&self, construct: impl Into<String>) -> VResult {
        Err(ValidationError::Forbidden {
            construct: construct.into(),
            line: self.line,
        })
    }

    fn syntax(&self, message: impl Into<String>) -> VResult {
        Err(ValidationError::Syntax {
            line: self.line,
            message: message.into(),
        })
    }

    fn block(&mut self, body: &[Stmt]) -> VResult {
        body.iter().try_for_each(|stmt| self.stmt(stmt))
    }

    fn stmt(&mut self, stmt: &Stmt) -> VResult {
        self.line = stmt.line;
        match &stmt.kind {
            StmtKind::Expr(e) => self.expr(e),
            StmtKind::Assign { targets, value } => {
                for target in targets {
                    self.target(target)?;
                }
                self.expr(value)
            }
            StmtKind::AugAssign { target, value, .. } => {
                self.target(target)?;
                self.expr(value)
            }
            StmtKind::If { test, body, orelse } => {
                self.expr(test)?;
                self.block(body)?;
                self.block(orelse)
            }
            StmtKind::While { test, body } => {
                self.expr(test)?;
                self.loop_body(body)
            }
            StmtKind::For { target, iter, body } => {
                self.target(target)?;
                self.expr(iter)?;
                self.loop_body(body)
            }
            StmtKind::FunctionDef(def) => self.function(def),
            StmtKind::Return(value) => {
                if !self.in_function {
                    return self.syntax("'return' outside function");
                }
                value.as_ref().map_or(Ok(()), |v| self.expr(v))
            }
            StmtKind::Delete(targets) => targets.iter().try_for_each(|t| self.target(t)),
            StmtKind::Assert { test, msg } => {
                self.expr(test)?;
                msg.as_ref().map_or(Ok(()), |m| self.expr(m))
            }
            StmtKind::Pass => Ok(()),
            StmtKind::Break | StmtKind::Continue => {
                if self.loop_depth == 0 {
                    let kw = if matches!(stmt.kind, StmtKind::Break) {
                        "break"
                    } else {
                        "continue"
                    };
                    return self.syntax(format!("'{}' outside loop", kw));
                }
                Ok(())
            }
            StmtKind::Import(modules) => self.forbidden(format!("import {}", modules.join(", "))),
            StmtKind::ImportFrom { module, .. } => {
                self.forbidden(format!("from {} import", module))
            }
            StmtKind::Global(_) => self.forbidden("global"),
            StmtKind::Nonlocal(_) => self.forbidden("nonlocal"),
            StmtKind::Unsupported(construct) => self.forbidden(*construct),
        }
    }

    fn loop_body(&mut self, body: &[Stmt]) -> VResult {
        self.loop_depth += 1;
        let result = self.block(body);
        self.loop_depth -= 1;
        result
    }

    fn function(&mut self, def: &FunctionDef) -> VResult {
        self.name(&def.name)?;
        for param in &def.params {
            self.name(&param.name)?;
            if let Some(default) = &param.default {
                self.expr(default)?;
            }
        }

        let saved = (self.in_function, self.loop_depth);
        self.in_function = true;
        self.loop_depth = 0;
        let result = self.block(&def.body);
        (self.in_function, self.loop_depth) = saved;
        result
    }

    fn name(&self, name: &str) -> VResult {
        if is_forbidden_name(name) {
            return self.forbidden(format!("name '{}'", name));
        }
        Ok(())
    }

    /// Assignment, deletion and loop targets.
    fn target(&mut self, target: &Expr) -> VResult {
        match target {
            Expr::Name(name) => self.name(name),
            Expr::Subscript { value, index } => {
                self.expr(value)?;
                self.expr(index)
            }
            Expr::Attribute { attr, .. } => {
                self.forbidden(format!("attribute assignment '{}'", attr))
            }
            Expr::Tuple(items) | Expr::List(items) => {
                items.iter().try_for_each(|item| self.target(item))
            }
            _ => self.syntax("cannot assign to expression"),
        }
    }

    fn expr(&mut self, expr: &Expr) -> VResult {
        match expr {
            Expr::Name(name) => self.name(name),
            Expr::Int(_) | Expr::Float(_) | Expr::Str(_) | Expr::Bool(_) | Expr::None => Ok(()),
            Expr::List(items) | Expr::Tuple(items) => {
                items.iter().try_for_each(|item| self.expr(item))
            }
            Expr::Dict(entries) => entries.iter().try_for_each(|(k, v)| {
                self.expr(k)?;
                self.expr(v)
            }),
            Expr::ListComp { elt, generators } => {
                generators.iter().try_for_each(|g| self.generator(g))?;
                self.expr(elt)
            }
            Expr::Attribute { value, attr } => {
                if attr.starts_with('_') || !is_allowed_attribute(attr) {
                    return self.forbidden(format!("attribute '{}'", attr));
                }
                self.expr(value)
            }
            Expr::Subscript { value, index } => {
                self.expr(value)?;
                self.expr(index)
            }
            Expr::Slice { lower, upper, step } => [lower, upper, step]
                .into_iter()
                .flatten()
                .try_for_each(|part| self.expr(part)),
            Expr::Call { func, args, kwargs } => {
                self.expr(func)?;
                args.iter().try_for_each(|a| self.expr(a))?;
                kwargs.iter().try_for_each(|(name, value)| {
                    self.name(name)?;
                    self.expr(value)
                })
            }
            Expr::BinOp { left, right, .. } => {
                self.expr(left)?;
                self.expr(right)
            }
            Expr::Unary { operand, .. } => self.expr(operand),
            Expr::And(a, b) | Expr::Or(a, b) => {
                self.expr(a)?;
                self.expr(b)
            }
            Expr::Compare { left, ops } => {
                self.expr(left)?;
                ops.iter().try_for_each(|(_, e)| self.expr(e))
            }
            Expr::IfExp { test, body, orelse } => {
                self.expr(test)?;
                self.expr(body)?;
                self.expr(orelse)
            }
            Expr::Lambda { .. } => self.forbidden("lambda"),
            Expr::Unsupported(construct) => self.forbidden(*construct),
        }
    }

    fn generator(&mut self, generator: &Comprehension) -> VResult {
        self.target(&generator.target)?;
        self.expr(&generator.iter)?;
        generator
            .conditions
            .iter()
            .try_for_each(|cond| self.expr(cond))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forbidden(code: &str) -> String {
        match validate(code) {
            Err(ValidationError::Forbidden { construct, .. }) => construct,
            other => panic!("expected Forbidden for {:?}, got {:?}", code, other),
        }
    }

    fn syntax(code: &str) -> String {
        match validate(code) {
            Err(ValidationError::Syntax { message, .. }) => message,
            other => panic!("expected Syntax for {:?}, got {:?}", code, other),
        }
    }

    #[test]
    fn test_simple_code_is_valid() {
        assert!(validate("x = 1 + 1").is_ok());
        assert!(validate("").is_ok());
        assert!(validate("\n\n# only a comment\n").is_ok());
        let unit = validate("a = 1\nb = a * 2\nprint(b)\n").unwrap();
        assert_eq!(unit.statement_count(), 3);
    }

    #[test]
    fn test_long_operator_chains_are_valid() {
        assert!(validate(&format!("x = 1{}", " + 1".repeat(149))).is_ok());
        assert!(validate(&format!("x = True{}", " and True".repeat(149))).is_ok());
    }

    #[test]
    fn test_realistic_script_is_valid() {
        let code = r#"
rows = data_file.read().splitlines()
counts = {}
for row in rows:
    for word in row.split():
        counts[word] = counts.get(word, 0) + 1

def top(items, n=3):
    return sorted(items, key=None)[:n]

best = top([(v, k) for k, v in counts.items() if v > 1])
assert len(best) <= 3, "too many"
"#;
        assert!(validate(code).is_ok(), "{:?}", validate(code));
    }

    #[test]
    fn test_imports_are_forbidden() {
        assert_eq!(forbidden("import os"), "import os");
        assert_eq!(forbidden("from os import path"), "from os import");
        assert_eq!(forbidden("if True:\n    import sys\n"), "import sys");
    }

    #[test]
    fn test_forbidden_statements() {
        assert_eq!(forbidden("class A:\n    pass\n"), "class");
        assert_eq!(forbidden("with x as y:\n    pass\n"), "with");
        assert_eq!(forbidden("try:\n    pass\nexcept:\n    pass\n"), "try");
        assert_eq!(forbidden("raise ValueError('x')"), "raise");
        assert_eq!(forbidden("def f():\n    global x\n"), "global");
        assert_eq!(forbidden("f = lambda: 1"), "lambda");
    }

    #[test]
    fn test_dangerous_names_are_forbidden() {
        for code in [
            "open('/etc/passwd')",
            "eval('1')",
            "exec('x = 1')",
            "__import__('os')",
            "getattr(x, 'y')",
            "x = globals()",
            "type(1)",
        ] {
            forbidden(code);
        }
        assert_eq!(forbidden("_secret = 1"), "name '_secret'");
        assert_eq!(forbidden("def f(__x):\n    pass\n"), "name '__x'");
        assert_eq!(forbidden("eval = 1"), "name 'eval'");
    }

    #[test]
    fn test_attribute_allow_list() {
        assert_eq!(forbidden("x = 'a'.__class__"), "attribute '__class__'");
        assert_eq!(forbidden("data_file.name"), "attribute 'name'");
        assert_eq!(forbidden("'{}'.format(1)"), "attribute 'format'");
        assert_eq!(forbidden("x.upper = 1"), "attribute assignment 'upper'");
        assert!(validate("'a,b'.split(',')").is_ok());
    }

    #[test]
    fn test_forbidden_inside_nested_expressions() {
        forbidden("x = [open(p) for p in ['a']]");
        forbidden("x = {'k': (1, __import__)}");
        forbidden("x = 1 if True else eval('2')");
        forbidden("print(key=__builtins__)");
        forbidden("def f(a=open):\n    pass\n");
    }

    #[test]
    fn test_control_flow_placement() {
        assert_eq!(syntax("return 1"), "'return' outside function");
        assert_eq!(syntax("break"), "'break' outside loop");
        assert_eq!(syntax("if True:\n    continue\n"), "'continue' outside loop");
        assert_eq!(
            syntax("while True:\n    def f():\n        break\n"),
            "'break' outside loop"
        );
        assert!(validate("while True:\n    if x:\n        break\n").is_ok());
        assert!(validate("def f():\n    for i in range(3):\n        return i\n").is_ok());
    }

    #[test]
    fn test_syntax_errors_report_line() {
        match validate("x = 1\ny = (\n") {
            Err(ValidationError::Syntax { line, .. }) => assert!(line >= 2),
            other => panic!("unexpected {:?}", other),
        }
        assert!(validate("x = = 1").is_err());
    }

    #[test]
    fn test_forbidden_error_message() {
        let err = validate("x = 1\nimport os\n").unwrap_err();
        assert_eq!(err.to_string(), "Forbidden construct: import os (line 2)");
    }

    #[test]
    fn test_validation_does_not_execute() {
        // would divide by zero and loop forever if evaluated
        assert!(validate("x = 1 / 0\nwhile True:\n    pass\n").is_ok());
    }
}
