// Recursive-descent parser. Precedence chain, loosest to tightest:
// expression -> range -> logical_or -> logical_and -> equality -> comparison
// -> term -> factor -> unary -> call -> primary.

use crate::ast::*;
use crate::errors::ParseError;
use crate::lexer::{Keyword, Token, TokenKind};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

pub fn parse(tokens: Vec<Token>) -> Result<Block, ParseError> {
    Parser::new(tokens).parse_program()
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or_else(|| self.tokens.last().unwrap())
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        self.tokens
            .get(self.pos + offset)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    fn is_eof(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if !matches!(tok.kind, TokenKind::Eof) {
            self.pos += 1;
        }
        tok
    }

    fn check_keyword(&self, kw: Keyword) -> bool {
        matches!(self.peek_kind(), TokenKind::Keyword(k) if *k == kw)
    }

    fn check_op(&self, op: &str) -> bool {
        matches!(self.peek_kind(), TokenKind::Operator(o) if *o == op)
    }

    fn check_punct(&self, c: char) -> bool {
        matches!(self.peek_kind(), TokenKind::Punctuation(p) if *p == c)
    }

    fn expect_punct(&mut self, c: char) -> Result<Token, ParseError> {
        if self.check_punct(c) {
            Ok(self.advance())
        } else {
            Err(ParseError {
                message: format!("expected '{}', found {}", c, self.peek().text()),
                token: Some(self.peek().clone()),
            })
        }
    }

    fn expect_keyword(&mut self, kw: Keyword) -> Result<Token, ParseError> {
        if self.check_keyword(kw) {
            Ok(self.advance())
        } else {
            Err(ParseError {
                message: format!("expected keyword, found {}", self.peek().text()),
                token: Some(self.peek().clone()),
            })
        }
    }

    fn expect_identifier(&mut self) -> Result<String, ParseError> {
        match self.peek_kind().clone() {
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(ParseError {
                message: format!("expected identifier, found {}", self.peek().text()),
                token: Some(self.peek().clone()),
            }),
        }
    }

    pub fn parse_program(&mut self) -> Result<Block, ParseError> {
        let mut statements = Vec::new();
        while !self.is_eof() {
            statements.push(self.parse_statement()?);
        }
        Ok(Block { statements, token: None })
    }

    fn parse_block(&mut self) -> Result<Block, ParseError> {
        let open = self.expect_punct('{')?;
        let mut statements = Vec::new();
        while !self.check_punct('}') && !self.is_eof() {
            statements.push(self.parse_statement()?);
        }
        self.expect_punct('}')?;
        Ok(Block { statements, token: Some(open) })
    }

    fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        if self.check_keyword(Keyword::Let) {
            self.parse_var_declare(false)
        } else if self.check_keyword(Keyword::Const) {
            self.parse_var_declare(true)
        } else if self.check_keyword(Keyword::Fn) {
            self.parse_function_def_stmt()
        } else if self.check_keyword(Keyword::If) {
            self.parse_if_stmt()
        } else if self.check_keyword(Keyword::While) {
            self.parse_while_stmt()
        } else if self.check_keyword(Keyword::For) {
            self.parse_for_in_stmt()
        } else if self.check_keyword(Keyword::Break) {
            let tok = self.advance();
            self.expect_punct(';')?;
            Ok(Stmt::Break(Some(tok)))
        } else if self.check_keyword(Keyword::Continue) {
            let tok = self.advance();
            self.expect_punct(';')?;
            Ok(Stmt::Continue(Some(tok)))
        } else if self.check_keyword(Keyword::Return) {
            self.parse_return_stmt()
        } else if self.check_punct('{') {
            Ok(Stmt::Block(self.parse_block()?))
        } else {
            self.parse_expr_or_assign_stmt()
        }
    }

    fn parse_var_declare(&mut self, is_const: bool) -> Result<Stmt, ParseError> {
        let tok = self.advance(); // `let` / `const`
        let name = self.expect_identifier()?;
        if !self.check_op("=") {
            return Err(ParseError {
                message: "expected '=' in variable declaration".into(),
                token: Some(self.peek().clone()),
            });
        }
        self.advance();
        let initializer = self.parse_expression()?;
        self.expect_punct(';')?;
        Ok(Stmt::VarDeclare(VarDeclareStmt { name, initializer, is_const, token: Some(tok) }))
    }

    fn parse_function_params(&mut self) -> Result<Vec<String>, ParseError> {
        self.expect_punct('(')?;
        let mut params = Vec::new();
        while !self.check_punct(')') {
            params.push(self.expect_identifier()?);
            if self.check_punct(',') {
                self.advance();
            } else {
                break;
            }
        }
        self.expect_punct(')')?;
        Ok(params)
    }

    fn parse_function_body(&mut self) -> Result<Block, ParseError> {
        let mut body = self.parse_block()?;
        body.token = None; // function bodies are inline: scope already opened by the call prelude
        Ok(body)
    }

    fn parse_function_def_stmt(&mut self) -> Result<Stmt, ParseError> {
        let tok = self.advance(); // `fn`
        let name = self.expect_identifier()?;
        let params = self.parse_function_params()?;
        let body = self.parse_function_body()?;
        Ok(Stmt::FunctionDef(FunctionDefStmt { name, params, body, token: Some(tok) }))
    }

    fn parse_if_stmt(&mut self) -> Result<Stmt, ParseError> {
        let tok = self.advance(); // `if`
        let condition = self.parse_expression()?;
        let then_branch = self.parse_block()?;
        let else_branch = if self.check_keyword(Keyword::Else) {
            self.advance();
            if self.check_keyword(Keyword::If) {
                let nested = self.parse_if_stmt()?;
                Some(Block { statements: vec![nested], token: None })
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        Ok(Stmt::If(IfStmt { condition, then_branch, else_branch, token: Some(tok) }))
    }

    fn parse_while_stmt(&mut self) -> Result<Stmt, ParseError> {
        let tok = self.advance(); // `while`
        let condition = self.parse_expression()?;
        let body = self.parse_block()?;
        Ok(Stmt::While(WhileStmt { condition, body, token: Some(tok) }))
    }

    fn parse_for_in_stmt(&mut self) -> Result<Stmt, ParseError> {
        let tok = self.advance(); // `for`
        let loop_variable = self.expect_identifier()?;
        self.expect_keyword(Keyword::In)?;
        let iterable = self.parse_expression()?;
        let body = self.parse_block()?;
        Ok(Stmt::ForIn(ForInStmt { loop_variable, iterable, body, token: Some(tok) }))
    }

    fn parse_return_stmt(&mut self) -> Result<Stmt, ParseError> {
        let tok = self.advance(); // `return`
        let value = if self.check_punct(';') { None } else { Some(self.parse_expression()?) };
        self.expect_punct(';')?;
        Ok(Stmt::Return(ReturnStmt { value, token: Some(tok) }))
    }

    fn parse_expr_or_assign_stmt(&mut self) -> Result<Stmt, ParseError> {
        let start_token = self.peek().clone();
        let expr = self.parse_expression()?;
        if self.check_op("=") {
            self.advance();
            let value = self.parse_expression()?;
            self.expect_punct(';')?;
            match expr {
                Expr::Variable(v) => {
                    Ok(Stmt::Assign(AssignStmt { name: v.name, value, token: Some(start_token) }))
                }
                Expr::Index(idx) => Ok(Stmt::AssignIndex(AssignIndexStmt {
                    collection: *idx.collection,
                    index: *idx.index,
                    value,
                    token: Some(start_token),
                })),
                _ => Err(ParseError {
                    message: "invalid assignment target".into(),
                    token: Some(start_token),
                }),
            }
        } else {
            self.expect_punct(';')?;
            Ok(Stmt::Expr(expr))
        }
    }

    fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        self.parse_range()
    }

    fn parse_range(&mut self) -> Result<Expr, ParseError> {
        let start = self.parse_logical_or()?;
        if self.check_punct(':') {
            let tok = self.advance();
            let end = self.parse_logical_or()?;
            let step = if self.check_punct(':') {
                self.advance();
                Some(Box::new(self.parse_logical_or()?))
            } else {
                None
            };
            return Ok(Expr::Range(RangeSpecifier {
                start: Box::new(start),
                end: Box::new(end),
                step,
                token: Some(tok),
            }));
        }
        Ok(start)
    }

    fn parse_logical_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_logical_and()?;
        while self.check_keyword(Keyword::Or) {
            let tok = self.advance();
            let right = self.parse_logical_and()?;
            left = Expr::Logical(LogicalOp {
                left: Box::new(left),
                op: LogicalOpKind::Or,
                right: Box::new(right),
                token: Some(tok),
            });
        }
        Ok(left)
    }

    fn parse_logical_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_equality()?;
        while self.check_keyword(Keyword::And) {
            let tok = self.advance();
            let right = self.parse_equality()?;
            left = Expr::Logical(LogicalOp {
                left: Box::new(left),
                op: LogicalOpKind::And,
                right: Box::new(right),
                token: Some(tok),
            });
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_comparison()?;
        loop {
            let kind = if self.check_op("==") {
                ComparisonOpKind::Eq
            } else if self.check_op("!=") {
                ComparisonOpKind::Neq
            } else {
                break;
            };
            let tok = self.advance();
            let right = self.parse_comparison()?;
            left = Expr::Comparison(ComparisonOp { left: Box::new(left), op: kind, right: Box::new(right), token: Some(tok) });
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_term()?;
        loop {
            let kind = if self.check_op(">") {
                ComparisonOpKind::Gt
            } else if self.check_op(">=") {
                ComparisonOpKind::Gte
            } else if self.check_op("<") {
                ComparisonOpKind::Lt
            } else if self.check_op("<=") {
                ComparisonOpKind::Lte
            } else {
                break;
            };
            let tok = self.advance();
            let right = self.parse_term()?;
            left = Expr::Comparison(ComparisonOp { left: Box::new(left), op: kind, right: Box::new(right), token: Some(tok) });
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_factor()?;
        loop {
            let kind = if self.check_op("+") {
                BinaryOpKind::Add
            } else if self.check_op("-") {
                BinaryOpKind::Sub
            } else {
                break;
            };
            let tok = self.advance();
            let right = self.parse_factor()?;
            left = Expr::Binary(BinaryOp { left: Box::new(left), op: kind, right: Box::new(right), token: Some(tok) });
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let kind = if self.check_op("*") {
                BinaryOpKind::Mul
            } else if self.check_op("/") {
                BinaryOpKind::Div
            } else if self.check_op("%") {
                BinaryOpKind::Mod
            } else {
                break;
            };
            let tok = self.advance();
            let right = self.parse_unary()?;
            left = Expr::Binary(BinaryOp { left: Box::new(left), op: kind, right: Box::new(right), token: Some(tok) });
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.check_op("-") {
            let tok = self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary(UnaryOp { op: UnaryOpKind::Neg, operand: Box::new(operand), token: Some(tok) }));
        }
        if self.check_keyword(Keyword::Not) {
            let tok = self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary(UnaryOp { op: UnaryOpKind::Not, operand: Box::new(operand), token: Some(tok) }));
        }
        self.parse_call()
    }

    fn parse_call(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.check_punct('(') {
                let tok = self.advance();
                let (arguments, keywords) = self.parse_call_arguments()?;
                expr = Expr::Call(CallExpr { callee: Box::new(expr), arguments, keywords, token: Some(tok) });
            } else if self.check_punct('[') {
                let tok = self.advance();
                let index = self.parse_expression()?;
                self.expect_punct(']')?;
                expr = Expr::Index(IndexExpr { collection: Box::new(expr), index: Box::new(index), token: Some(tok) });
            } else if self.check_punct('.') {
                let tok = self.advance();
                let attr = self.expect_identifier()?;
                expr = Expr::Dot(DotExpr { object: Box::new(expr), attr, token: Some(tok) });
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_call_arguments(&mut self) -> Result<(Vec<Expr>, Vec<KeywordArg>), ParseError> {
        let mut arguments = Vec::new();
        let mut keywords = Vec::new();
        while !self.check_punct(')') {
            let is_keyword = matches!(self.peek_kind(), TokenKind::Identifier(_)) && matches!(self.peek_at(1), TokenKind::Punctuation(':'));
            if is_keyword {
                let name = self.expect_identifier()?;
                self.advance(); // ':'
                let value = self.parse_expression()?;
                keywords.push(KeywordArg { name, value });
            } else {
                if !keywords.is_empty() {
                    return Err(ParseError {
                        message: "positional argument cannot follow a keyword argument".into(),
                        token: Some(self.peek().clone()),
                    });
                }
                arguments.push(self.parse_expression()?);
            }
            if self.check_punct(',') {
                self.advance();
            } else {
                break;
            }
        }
        self.expect_punct(')')?;
        Ok((arguments, keywords))
    }

    fn parse_function_expr(&mut self) -> Result<Expr, ParseError> {
        let tok = self.advance(); // `fn`
        let params = self.parse_function_params()?;
        let body = self.parse_function_body()?;
        Ok(Expr::Function(FunctionExpr { params, body, token: Some(tok) }))
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        match self.peek_kind().clone() {
            TokenKind::Int(n) => {
                let tok = self.advance();
                Ok(Expr::Number(Number { value: NumberValue::Int(n), token: Some(tok) }))
            }
            TokenKind::Float(n) => {
                let tok = self.advance();
                Ok(Expr::Number(Number { value: NumberValue::Float(n), token: Some(tok) }))
            }
            TokenKind::Str(s) => {
                let tok = self.advance();
                Ok(Expr::String(StringLit { value: s, token: Some(tok) }))
            }
            TokenKind::Keyword(Keyword::True) => {
                let tok = self.advance();
                Ok(Expr::Boolean(Boolean { value: true, token: Some(tok) }))
            }
            TokenKind::Keyword(Keyword::False) => {
                let tok = self.advance();
                Ok(Expr::Boolean(Boolean { value: false, token: Some(tok) }))
            }
            TokenKind::Keyword(Keyword::None_) => {
                let tok = self.advance();
                Ok(Expr::None(NoneLit { token: Some(tok) }))
            }
            TokenKind::Keyword(Keyword::Fn) => self.parse_function_expr(),
            TokenKind::Identifier(name) => {
                let tok = self.advance();
                Ok(Expr::Variable(VariableExpr { name, token: Some(tok) }))
            }
            TokenKind::Punctuation('(') => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect_punct(')')?;
                Ok(expr)
            }
            TokenKind::Punctuation('[') => {
                let tok = self.advance();
                let mut elements = Vec::new();
                while !self.check_punct(']') {
                    elements.push(self.parse_expression()?);
                    if self.check_punct(',') {
                        self.advance();
                    } else {
                        break;
                    }
                }
                self.expect_punct(']')?;
                Ok(Expr::Array(ArrayLiteral { elements, token: Some(tok) }))
            }
            _ => Err(ParseError {
                message: format!("unexpected token {}", self.peek().text()),
                token: Some(self.peek().clone()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse_src(src: &str) -> Block {
        parse(tokenize(src)).expect("parse should succeed")
    }

    #[test]
    fn arithmetic_precedence() {
        let block = parse_src("let x = 2 + 3 * 4;");
        assert_eq!(block.statements.len(), 1);
        match &block.statements[0] {
            Stmt::VarDeclare(v) => match &v.initializer {
                Expr::Binary(b) => assert_eq!(b.op, BinaryOpKind::Add),
                other => panic!("expected Binary(Add), got {:?}", other),
            },
            other => panic!("expected VarDeclare, got {:?}", other),
        }
    }

    #[test]
    fn else_if_desugars_to_nested_block() {
        let block = parse_src("if true { } else if false { } else { }");
        match &block.statements[0] {
            Stmt::If(i) => {
                let else_block = i.else_branch.as_ref().unwrap();
                assert_eq!(else_block.statements.len(), 1);
                assert!(matches!(else_block.statements[0], Stmt::If(_)));
            }
            other => panic!("expected If, got {:?}", other),
        }
    }

    #[test]
    fn index_assignment_vs_index_read() {
        let block = parse_src("a[0] = 1; b[0];");
        assert!(matches!(block.statements[0], Stmt::AssignIndex(_)));
        assert!(matches!(block.statements[1], Stmt::Expr(Expr::Index(_))));
    }

    #[test]
    fn trailing_comma_in_array_literal() {
        let block = parse_src("let a = [1, 2, 3,];");
        match &block.statements[0] {
            Stmt::VarDeclare(v) => match &v.initializer {
                Expr::Array(a) => assert_eq!(a.elements.len(), 3),
                other => panic!("expected Array, got {:?}", other),
            },
            other => panic!("expected VarDeclare, got {:?}", other),
        }
    }

    #[test]
    fn keyword_after_positional_is_rejected() {
        let result = parse(tokenize("f(a: 1, 2);"));
        assert!(result.is_err());
    }

    #[test]
    fn range_with_step() {
        let block = parse_src("for i in 1:10:2 { }");
        match &block.statements[0] {
            Stmt::ForIn(f) => match &f.iterable {
                Expr::Range(r) => assert!(r.step.is_some()),
                other => panic!("expected Range, got {:?}", other),
            },
            other => panic!("expected ForIn, got {:?}", other),
        }
    }

    #[test]
    fn function_body_block_has_no_token() {
        let block = parse_src("fn f() { let x = 1; }");
        match &block.statements[0] {
            Stmt::FunctionDef(f) => assert!(f.body.token.is_none()),
            other => panic!("expected FunctionDef, got {:?}", other),
        }
    }
}
