//! Expression lowering
//!
//! Every lowered value carries its static type and, for boxed values,
//! whether it owns a new reference. Owned temporaries are registered in the
//! enclosing release frame and decref'd when the frame closes, so each
//! statement and block releases exactly what it created.

use crate::backend::abi::{CompareId, NumberOp, ObjectAbi};
use crate::backend::codegen::{escape_c, CodeGenerator, Dispatch, Result, Ty, Value};
use crate::backend::registry::{self, Receiver, RetKind};
use crate::frontend::ast::*;

impl<'a, A: ObjectAbi> CodeGenerator<'a, A> {
    // ==================== Value plumbing ====================

    /// Ensure a value is addressable by name so it can be referenced more
    /// than once without re-evaluating.
    pub(crate) fn materialize(&mut self, v: Value) -> Value {
        if v.ty == Ty::Void || is_simple_ident(&v.code) {
            return v;
        }
        if v.ty.is_boxed() {
            // Boxed producers always materialize already
            return v;
        }
        let ty = v.ty.clone();
        self.native_temp(ty, &v.code)
    }

    /// Box a native value; the result owns one new reference
    pub(crate) fn to_boxed(&mut self, v: Value) -> Result<Value> {
        if v.ty.is_boxed() {
            return Ok(v);
        }
        let ctor = match v.ty {
            Ty::Int => self.abi.from_int(),
            Ty::Float => self.abi.from_float(),
            Ty::Bool => self.abi.from_bool(),
            _ => {
                return Err(self.unresolved("boxed form of this value", crate::utils::Span::dummy()))
            }
        };
        let code = v.code;
        Ok(self.boxed_temp(Ty::Obj, &format!("{ctor}({code})")))
    }

    /// Extract a native value of the wanted type; boxed sources are read
    /// through the ABI and their temporary released by the frame.
    pub(crate) fn coerce_native(&mut self, v: Value, want: &Ty) -> Result<Value> {
        let code = v.code.clone();
        let out = match (want, &v.ty) {
            (Ty::Int, Ty::Int) | (Ty::Float, Ty::Float) | (Ty::Bool, Ty::Bool) => v,
            (Ty::Int, Ty::Bool) => Value::native(format!("((int64_t)({code}))"), Ty::Int),
            (Ty::Int, Ty::Float) => Value::native(format!("((int64_t)({code}))"), Ty::Int),
            (Ty::Int, Ty::Str) => Value::native(format!("pyrt_str_to_i64({code})"), Ty::Int),
            (Ty::Int, t) if t.is_boxed() => {
                let as_int = self.abi.as_int();
                Value::native(format!("((int64_t){as_int}({code}))"), Ty::Int)
            }
            (Ty::Float, Ty::Int) | (Ty::Float, Ty::Bool) => {
                Value::native(format!("((double)({code}))"), Ty::Float)
            }
            (Ty::Float, Ty::Str) => Value::native(format!("pyrt_str_to_f64({code})"), Ty::Float),
            (Ty::Float, t) if t.is_boxed() => {
                let as_float = self.abi.as_float();
                Value::native(format!("{as_float}({code})"), Ty::Float)
            }
            (Ty::Bool, Ty::Int) | (Ty::Bool, Ty::Float) => {
                Value::native(format!("(({code}) != 0)"), Ty::Bool)
            }
            (Ty::Bool, t) if t.is_boxed() => {
                let is_true = self.abi.is_true();
                Value::native(format!("({is_true}({code}) != 0)"), Ty::Bool)
            }
            _ => {
                return Err(self.unresolved(
                    &format!("conversion to {want:?}"),
                    crate::utils::Span::dummy(),
                ))
            }
        };
        Ok(out)
    }

    pub(crate) fn coerce_int(&mut self, v: Value) -> Result<Value> {
        self.coerce_native(v, &Ty::Int)
    }

    /// Lower to a C truth expression (int-valued)
    pub(crate) fn lower_truth(&mut self, expr: &Expr) -> Result<String> {
        let v = self.lower_expr(expr)?;
        Ok(self.truth_of(&v))
    }

    pub(crate) fn truth_of(&mut self, v: &Value) -> String {
        let code = &v.code;
        match &v.ty {
            Ty::Bool | Ty::Int => format!("({code})"),
            Ty::Float => format!("(({code}) != 0.0)"),
            Ty::Instance(_) => format!("({code} != NULL)"),
            Ty::Void => "0".to_string(),
            _ => {
                let is_true = self.abi.is_true();
                format!("({is_true}({code}) != 0)")
            }
        }
    }

    // ==================== Statement-position expressions ====================

    pub(crate) fn lower_expr_statement(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            // Docstrings and bare constants lower to nothing
            Expr::Constant { .. } => Ok(()),
            Expr::Call { func, args, keywords, span } => {
                if let Expr::Name { id, .. } = &**func {
                    if id == "print" {
                        if !keywords.is_empty() {
                            return Err(self.unsupported("print keyword arguments", *span));
                        }
                        return self.lower_print(args);
                    }
                }
                let _ = self.lower_expr(expr)?;
                Ok(())
            }
            _ => {
                let _ = self.lower_expr(expr)?;
                Ok(())
            }
        }
    }

    fn lower_print(&mut self, args: &[Expr]) -> Result<()> {
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                self.writeln("fputc(' ', stdout);");
            }
            let v = self.lower_expr(arg)?;
            let code = v.code.clone();
            match &v.ty {
                Ty::Int => self.emitf(format_args!("pyrt_write_i64({code});")),
                Ty::Float => self.emitf(format_args!("pyrt_write_f64({code});")),
                Ty::Bool => self.emitf(format_args!("pyrt_write_bool({code});")),
                Ty::Instance(_) | Ty::Void => {
                    return Err(self.unsupported("print of this value", arg.span()))
                }
                _ => self.emitf(format_args!("pyrt_write_obj({code});")),
            }
        }
        self.writeln("fputc('\\n', stdout);");
        Ok(())
    }

    // ==================== Assignment targets ====================

    pub(crate) fn assign_to(&mut self, target: &Expr, v: Value) -> Result<()> {
        match target {
            Expr::Name { id, span } => {
                if v.ty == Ty::Void {
                    return Ok(());
                }
                let declared = self
                    .var_types
                    .get(id)
                    .cloned()
                    .ok_or_else(|| self.unresolved(&format!("variable {id}"), *span))?;
                match declared {
                    Ty::Void => Ok(()),
                    Ty::Int | Ty::Float | Ty::Bool => {
                        let v = self.coerce_native(v, &declared)?;
                        let code = v.code;
                        self.emitf(format_args!("{id} = {code};"));
                        Ok(())
                    }
                    Ty::Instance(cls) => {
                        if v.ty != Ty::Instance(cls.clone()) {
                            return Err(self.unresolved(&format!("value for {id}"), *span));
                        }
                        let code = v.code;
                        self.emitf(format_args!("{id} = {code};"));
                        Ok(())
                    }
                    _ => {
                        let v = self.to_boxed(v)?;
                        self.store_boxed_into(&v, id);
                        Ok(())
                    }
                }
            }
            Expr::Attribute { value, attr, span } => {
                let recv = self.lower_expr(value)?;
                match recv.ty.clone() {
                    Ty::Instance(cls) => {
                        let field_ty = self
                            .classes
                            .get(&cls)
                            .and_then(|l| l.field(attr))
                            .cloned()
                            .ok_or_else(|| {
                                self.unresolved(&format!("field {cls}.{attr}"), *span)
                            })?;
                        self.record_decision(format!("{cls}.{attr}"), Dispatch::Direct);
                        let slot = format!("{}->{attr}", recv.code);
                        match field_ty {
                            Ty::Int | Ty::Float | Ty::Bool => {
                                let v = self.coerce_native(v, &field_ty)?;
                                let code = v.code;
                                self.emitf(format_args!("{slot} = {code};"));
                            }
                            Ty::Instance(_) => {
                                let code = v.code;
                                self.emitf(format_args!("{slot} = {code};"));
                            }
                            Ty::Void => {}
                            _ => {
                                let v = self.to_boxed(v)?;
                                self.store_boxed_into(&v, &slot);
                            }
                        }
                        Ok(())
                    }
                    t if t.is_boxed() => {
                        self.record_decision(format!("dyn.{attr}"), Dispatch::Boxed);
                        let v = self.to_boxed(v)?;
                        let setattr = self.abi.setattr();
                        let recv_c = recv.code;
                        let v_c = v.code;
                        self.emitf(format_args!("{setattr}({recv_c}, \"{attr}\", {v_c});"));
                        Ok(())
                    }
                    _ => Err(self.unresolved(&format!("attribute {attr}"), *span)),
                }
            }
            Expr::Subscript { value, index, span } => {
                if matches!(&**index, Expr::Slice { .. }) {
                    return Err(self.unsupported("slice assignment", *span));
                }
                let recv = self.lower_expr(value)?;
                if !recv.ty.is_boxed() {
                    return Err(self.unresolved("subscript target", *span));
                }
                let key = self.lower_expr(index)?;
                let key = self.to_boxed(key)?;
                let v = self.to_boxed(v)?;
                let set_item = self.abi.object_set_item();
                let (recv_c, key_c, v_c) = (recv.code, key.code, v.code);
                self.emitf(format_args!("{set_item}({recv_c}, {key_c}, {v_c});"));
                Ok(())
            }
            Expr::Tuple { elts, span } | Expr::List { elts, span } => {
                if !v.ty.is_boxed() {
                    return Err(self.unresolved("unpacked value", *span));
                }
                let get = self.abi.seq_get_item();
                let src = v.code.clone();
                for (i, elt) in elts.iter().enumerate() {
                    let item = self.boxed_temp(Ty::Obj, &format!("{get}({src}, {i})"));
                    self.assign_to(elt, item)?;
                }
                Ok(())
            }
            other => Err(self.unsupported("assignment target", other.span())),
        }
    }

    /// Replace the boxed reference held by `slot` with `v`, moving the
    /// owned reference when possible and taking a new one otherwise.
    fn store_boxed_into(&mut self, v: &Value, slot: &str) {
        let xdecref = self.abi.xdecref();
        let code = v.code.clone();
        if v.owned && self.untrack(&code) {
            self.emitf(format_args!("{xdecref}({slot});"));
            self.emitf(format_args!("{slot} = {code};"));
        } else {
            let incref = self.abi.incref();
            self.emitf(format_args!("{incref}({code});"));
            self.emitf(format_args!("{xdecref}({slot});"));
            self.emitf(format_args!("{slot} = {code};"));
        }
    }

    // ==================== Expressions ====================

    pub(crate) fn lower_expr(&mut self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Constant { value, span } => self.lower_constant(value, *span),
            Expr::Name { id, span } => {
                if let Some(ty) = self.var_types.get(id) {
                    return Ok(Value::native(id.clone(), ty.clone()));
                }
                Err(self.unresolved(&format!("name {id}"), *span))
            }
            Expr::BinOp {
                left, op, right, span,
            } => self.lower_binop(left, *op, right, *span),
            Expr::UnaryOp { op, operand, span } => self.lower_unaryop(*op, operand, *span),
            Expr::BoolOp { op, values, .. } => self.lower_boolop(*op, values),
            Expr::Compare {
                left,
                ops,
                comparators,
                ..
            } => self.lower_compare(left, ops, comparators),
            Expr::IfExp {
                test, body, orelse, ..
            } => self.lower_ifexp(test, body, orelse),
            Expr::NamedExpr { name, value, span } => {
                let v = self.lower_expr(value)?;
                let v = self.materialize(v);
                self.assign_to(
                    &Expr::Name {
                        id: name.clone(),
                        span: *span,
                    },
                    v,
                )?;
                let ty = self
                    .var_types
                    .get(name)
                    .cloned()
                    .ok_or_else(|| self.unresolved(&format!("variable {name}"), *span))?;
                Ok(Value::native(name.clone(), ty))
            }
            Expr::Call {
                func,
                args,
                keywords,
                span,
            } => self.lower_call(func, args, keywords, *span),
            Expr::Attribute { value, attr, span } => self.lower_attribute(value, attr, *span),
            Expr::Subscript { value, index, span } => self.lower_subscript(value, index, *span),
            Expr::FString { parts, .. } => self.lower_fstring(parts),
            Expr::List { elts, .. } => self.lower_list_literal(elts),
            Expr::Tuple { elts, .. } => self.lower_tuple_literal(elts),
            Expr::Set { elts, .. } => self.lower_set_literal(elts),
            Expr::Dict {
                keys, values, span, ..
            } => self.lower_dict_literal(keys, values, *span),
            Expr::ListComp {
                elt, generators, span,
            } => self.lower_list_comp(elt, generators, *span),
            Expr::SetComp { span, .. } => Err(self.unsupported("set comprehension", *span)),
            Expr::DictComp { span, .. } => Err(self.unsupported("dict comprehension", *span)),
            Expr::GeneratorExp { span, .. } => Err(self.unsupported("generator expression", *span)),
            Expr::Lambda { span, .. } => Err(self.unsupported("lambda", *span)),
            Expr::Starred { span, .. } => Err(self.unsupported("starred expression", *span)),
            Expr::Slice { span, .. } => Err(self.unsupported("slice outside subscript", *span)),
        }
    }

    fn lower_constant(&mut self, value: &Constant, span: crate::utils::Span) -> Result<Value> {
        match value {
            Constant::Int(i) => Ok(Value::native(format!("{i}LL"), Ty::Int)),
            Constant::Float(f) => Ok(Value::native(format!("{f:?}"), Ty::Float)),
            Constant::Bool(b) => Ok(Value::native(if *b { "true" } else { "false" }, Ty::Bool)),
            Constant::Str(s) => {
                let from_str = self.abi.from_str();
                let text = escape_c(s);
                Ok(self.boxed_temp(Ty::Str, &format!("{from_str}(\"{text}\")")))
            }
            Constant::Bytes(b) => {
                let from_bytes = self.abi.from_bytes();
                let text: String = b.iter().map(|c| format!("\\x{c:02x}")).collect();
                let len = b.len();
                Ok(self.boxed_temp(Ty::Obj, &format!("{from_bytes}(\"{text}\", {len})")))
            }
            Constant::None => Ok(Value::native(self.abi.none_object(), Ty::Obj)),
            Constant::Complex(_) => Err(self.unsupported("complex literal", span)),
            Constant::Ellipsis => Err(self.unsupported("ellipsis", span)),
        }
    }

    fn lower_binop(
        &mut self,
        left: &Expr,
        op: BinOp,
        right: &Expr,
        span: crate::utils::Span,
    ) -> Result<Value> {
        let l = self.lower_expr(left)?;
        let r = self.lower_expr(right)?;
        let result_ty = self.binop_result_ty(&l.ty, op, &r.ty);

        // String and list operators with statically known operands
        match (&l.ty, op, &r.ty) {
            (Ty::Str, BinOp::Add, Ty::Str) => {
                let (lc, rc) = (l.code, r.code);
                return Ok(self.boxed_temp(Ty::Str, &format!("pyrt_str_concat({lc}, {rc})")));
            }
            (Ty::List, BinOp::Add, Ty::List) => {
                let (lc, rc) = (l.code, r.code);
                return Ok(self.boxed_temp(Ty::List, &format!("pyrt_list_concat({lc}, {rc})")));
            }
            (Ty::Str, BinOp::Mult, Ty::Int) => {
                let (lc, rc) = (l.code, r.code);
                return Ok(self.boxed_temp(Ty::Str, &format!("pyrt_str_repeat({lc}, {rc})")));
            }
            (Ty::Int, BinOp::Mult, Ty::Str) => {
                let (lc, rc) = (l.code, r.code);
                return Ok(self.boxed_temp(Ty::Str, &format!("pyrt_str_repeat({rc}, {lc})")));
            }
            (Ty::List, BinOp::Mult, Ty::Int) => {
                let (lc, rc) = (l.code, r.code);
                return Ok(self.boxed_temp(Ty::List, &format!("pyrt_list_repeat({lc}, {rc})")));
            }
            _ => {}
        }

        // Boxed fallback through the number protocol
        if !l.ty.is_numeric() || !r.ty.is_numeric() {
            let l = self.to_boxed(l)?;
            let r = self.to_boxed(r)?;
            let symbol = self.abi.number_op(number_op_of(op));
            let (lc, rc) = (l.code, r.code);
            return Ok(self.boxed_temp(Ty::Obj, &format!("{symbol}({lc}, {rc})")));
        }

        // Native numeric lowering
        let any_float = l.ty == Ty::Float || r.ty == Ty::Float;
        let (lc, rc) = (l.code, r.code);
        let code = match op {
            BinOp::Add => format!("(({lc}) + ({rc}))"),
            BinOp::Sub => format!("(({lc}) - ({rc}))"),
            BinOp::Mult => format!("(({lc}) * ({rc}))"),
            BinOp::Div => format!("(((double)({lc})) / ((double)({rc})))"),
            BinOp::FloorDiv => {
                if any_float {
                    format!("floor(((double)({lc})) / ((double)({rc})))")
                } else {
                    format!("pyrt_floordiv_i64({lc}, {rc})")
                }
            }
            BinOp::Mod => {
                if any_float {
                    format!("fmod(({lc}), ({rc}))")
                } else {
                    format!("pyrt_mod_i64({lc}, {rc})")
                }
            }
            BinOp::Pow => {
                if any_float {
                    format!("pow((double)({lc}), (double)({rc}))")
                } else {
                    format!("pyrt_pow_i64({lc}, {rc})")
                }
            }
            BinOp::LShift => format!("(({lc}) << ({rc}))"),
            BinOp::RShift => format!("(({lc}) >> ({rc}))"),
            BinOp::BitOr => format!("(({lc}) | ({rc}))"),
            BinOp::BitXor => format!("(({lc}) ^ ({rc}))"),
            BinOp::BitAnd => format!("(({lc}) & ({rc}))"),
            BinOp::MatMult => return Err(self.unsupported("matrix multiply on numbers", span)),
        };
        Ok(Value::native(code, result_ty))
    }

    fn lower_unaryop(
        &mut self,
        op: UnaryOp,
        operand: &Expr,
        span: crate::utils::Span,
    ) -> Result<Value> {
        let _ = span;
        match op {
            UnaryOp::Not => {
                let t = self.lower_truth(operand)?;
                Ok(Value::native(format!("(!{t})"), Ty::Bool))
            }
            UnaryOp::USub | UnaryOp::UAdd | UnaryOp::Invert => {
                let v = self.lower_expr(operand)?;
                if v.ty.is_numeric() {
                    let code = v.code;
                    let out = match op {
                        UnaryOp::USub => format!("(-({code}))"),
                        UnaryOp::UAdd => format!("(+({code}))"),
                        _ => format!("(~({code}))"),
                    };
                    let ty = if op == UnaryOp::Invert { Ty::Int } else { v.ty };
                    Ok(Value::native(out, ty))
                } else {
                    let v = self.to_boxed(v)?;
                    let symbol = self.abi.number_op(match op {
                        UnaryOp::USub => NumberOp::Neg,
                        UnaryOp::UAdd => NumberOp::Pos,
                        _ => NumberOp::Invert,
                    });
                    let code = v.code;
                    Ok(self.boxed_temp(Ty::Obj, &format!("{symbol}({code})")))
                }
            }
        }
    }

    /// Short-circuit fold of a flat `and`/`or` chain
    fn lower_boolop(&mut self, op: BoolOpKind, values: &[Expr]) -> Result<Value> {
        let res = self.fresh("b");
        self.emitf(format_args!("bool {res} = false;"));

        self.push_frame();
        let first = self.lower_truth(&values[0])?;
        self.emitf(format_args!("{res} = {first};"));
        self.flush_frame();

        for value in &values[1..] {
            match op {
                BoolOpKind::And => self.emitf(format_args!("if ({res}) {{")),
                BoolOpKind::Or => self.emitf(format_args!("if (!{res}) {{")),
            }
            self.indent_in();
            self.push_frame();
            let t = self.lower_truth(value)?;
            self.emitf(format_args!("{res} = {t};"));
            self.flush_frame();
            self.indent_out();
            self.writeln("}");
        }
        Ok(Value::native(res, Ty::Bool))
    }

    /// A chained comparison short-circuits between adjacent terms and
    /// evaluates each operand once.
    fn lower_compare(
        &mut self,
        left: &Expr,
        ops: &[CmpOp],
        comparators: &[Expr],
    ) -> Result<Value> {
        let res = self.fresh("c");
        self.emitf(format_args!("bool {res} = false;"));

        self.push_frame();
        let l = self.lower_expr(left)?;
        let l = self.materialize(l);
        self.lower_compare_tail(&res, l, ops, comparators, 0)?;
        self.flush_frame();

        Ok(Value::native(res, Ty::Bool))
    }

    fn lower_compare_tail(
        &mut self,
        res: &str,
        left: Value,
        ops: &[CmpOp],
        comparators: &[Expr],
        idx: usize,
    ) -> Result<()> {
        let right = self.lower_expr(&comparators[idx])?;
        let right = self.materialize(right);
        let cmp = self.compare_code(&left, ops[idx], &right)?;
        self.emitf(format_args!("{res} = {cmp};"));

        if idx + 1 < ops.len() {
            self.emitf(format_args!("if ({res}) {{"));
            self.indent_in();
            self.push_frame();
            self.lower_compare_tail(res, right, ops, comparators, idx + 1)?;
            self.flush_frame();
            self.indent_out();
            self.writeln("}");
        }
        Ok(())
    }

    fn compare_code(&mut self, l: &Value, op: CmpOp, r: &Value) -> Result<String> {
        use CmpOp::*;

        match op {
            Is => return Ok(format!("((void *)({}) == (void *)({}))", l.code, r.code)),
            IsNot => return Ok(format!("((void *)({}) != (void *)({}))", l.code, r.code)),
            In | NotIn => {
                let item = self.to_boxed(l.clone())?;
                let container = self.to_boxed(r.clone())?;
                let contains = self.abi.seq_contains();
                let (ic, cc) = (item.code, container.code);
                let base = format!("{contains}({cc}, {ic})");
                return Ok(match op {
                    In => format!("({base} > 0)"),
                    _ => format!("({base} == 0)"),
                });
            }
            _ => {}
        }

        if l.ty.is_numeric() && r.ty.is_numeric() {
            let c_op = match op {
                Eq => "==",
                NotEq => "!=",
                Lt => "<",
                LtE => "<=",
                Gt => ">",
                GtE => ">=",
                _ => unreachable!(),
            };
            return Ok(format!("(({}) {c_op} ({}))", l.code, r.code));
        }

        if l.ty == Ty::Str && r.ty == Ty::Str {
            let c_op = match op {
                Eq => "==",
                NotEq => "!=",
                Lt => "<",
                LtE => "<=",
                Gt => ">",
                GtE => ">=",
                _ => unreachable!(),
            };
            return Ok(format!("(pyrt_str_cmp({}, {}) {c_op} 0)", l.code, r.code));
        }

        // Boxed rich comparison
        let lb = self.to_boxed(l.clone())?;
        let rb = self.to_boxed(r.clone())?;
        let rich = self.abi.rich_compare();
        let opid = self.abi.compare_opid(match op {
            Eq => CompareId::Eq,
            NotEq => CompareId::Ne,
            Lt => CompareId::Lt,
            LtE => CompareId::Le,
            Gt => CompareId::Gt,
            GtE => CompareId::Ge,
            _ => unreachable!(),
        });
        Ok(format!("({rich}({}, {}, {opid}) > 0)", lb.code, rb.code))
    }

    fn lower_ifexp(&mut self, test: &Expr, body: &Expr, orelse: &Expr) -> Result<Value> {
        let var_types = self.var_types.clone();
        let ty = self
            .static_expr_ty(body, &var_types)
            .unify(&self.static_expr_ty(orelse, &var_types));

        let res = self.fresh("t");
        let boxed = ty.is_boxed();
        if boxed {
            self.emitf(format_args!("PyObject *{res} = NULL;"));
        } else {
            let c_ty = ty.c_type();
            self.emitf(format_args!("{} {res};", c_ty.trim_end()));
        }

        let cond = self.lower_condition(test)?;
        self.emitf(format_args!("if ({cond}) {{"));
        self.indent_in();
        self.push_frame();
        let bv = self.lower_expr(body)?;
        self.store_branch_result(&res, bv, &ty)?;
        self.flush_frame();
        self.indent_out();
        self.writeln("} else {");
        self.indent_in();
        self.push_frame();
        let ov = self.lower_expr(orelse)?;
        self.store_branch_result(&res, ov, &ty)?;
        self.flush_frame();
        self.indent_out();
        self.writeln("}");

        if boxed {
            self.track(&res);
            Ok(Value {
                code: res,
                ty,
                owned: true,
            })
        } else {
            Ok(Value::native(res, ty))
        }
    }

    fn store_branch_result(&mut self, res: &str, v: Value, ty: &Ty) -> Result<()> {
        if ty.is_boxed() {
            let v = self.to_boxed(v)?;
            if v.owned && self.untrack(&v.code) {
                let code = v.code;
                self.emitf(format_args!("{res} = {code};"));
            } else {
                let incref = self.abi.incref();
                let code = v.code;
                self.emitf(format_args!("{incref}({code});"));
                self.emitf(format_args!("{res} = {code};"));
            }
        } else {
            let v = self.coerce_native(v, ty)?;
            let code = v.code;
            self.emitf(format_args!("{res} = {code};"));
        }
        Ok(())
    }

    // ==================== Calls ====================

    fn lower_call(
        &mut self,
        func: &Expr,
        args: &[Expr],
        keywords: &[Keyword],
        span: crate::utils::Span,
    ) -> Result<Value> {
        if !keywords.is_empty() {
            return Err(self.unsupported("keyword arguments", span));
        }
        if args.iter().any(|a| matches!(a, Expr::Starred { .. })) {
            return Err(self.unsupported("starred call argument", span));
        }

        match func {
            Expr::Name { id, .. } => {
                if let Some(result) = self.lower_builtin(id, args, span)? {
                    return Ok(result);
                }
                // Class instantiation
                if self.classes.contains_key(id) {
                    let init_params = self.classes[id].init_params.clone();
                    if init_params.len() != args.len() {
                        return Err(
                            self.unsupported(&format!("arity of {id}() constructor"), span)
                        );
                    }
                    let arg_code = self.marshal_args(
                        &init_params.iter().map(|(_, t)| t.clone()).collect::<Vec<_>>(),
                        args,
                    )?;
                    let cls = id.clone();
                    return Ok(self.native_temp(
                        Ty::Instance(cls.clone()),
                        &format!("{cls}_new({})", arg_code.join(", ")),
                    ));
                }
                // Module-level function
                if let Some(sig) = self.fn_sigs.get(id).cloned() {
                    if sig.params.len() != args.len() {
                        return Err(self.unsupported(&format!("arity of call to {id}"), span));
                    }
                    let tys: Vec<Ty> = sig.params.iter().map(|(_, t)| t.clone()).collect();
                    let arg_code = self.marshal_args(&tys, args)?;
                    return self.finish_direct_call(&sig.symbol, &arg_code, sig.ret);
                }
                Err(self.unresolved(&format!("function {id}"), span))
            }
            Expr::Attribute { value, attr, .. } => self.lower_method_call(value, attr, args, span),
            other => {
                // Calling an arbitrary boxed callable
                let callee = self.lower_expr(other)?;
                let callee = self.to_boxed(callee)?;
                let bundle = self.build_args_tuple(args)?;
                let call = self.abi.call_object();
                let (fc, bc) = (callee.code, bundle.code);
                Ok(self.boxed_temp(Ty::Obj, &format!("{call}({fc}, {bc})")))
            }
        }
    }

    fn finish_direct_call(&mut self, symbol: &str, args: &[String], ret: Ty) -> Result<Value> {
        let call = format!("{symbol}({})", args.join(", "));
        match ret {
            Ty::Void => {
                self.emitf(format_args!("{call};"));
                Ok(Value::native("0", Ty::Void))
            }
            Ty::Int | Ty::Float | Ty::Bool => Ok(Value::native(call, ret)),
            Ty::Instance(_) => Ok(self.native_temp(ret, &call)),
            boxed => Ok(self.boxed_temp(boxed, &call)),
        }
    }

    fn lower_method_call(
        &mut self,
        receiver: &Expr,
        method: &str,
        args: &[Expr],
        span: crate::utils::Span,
    ) -> Result<Value> {
        // Imported module function: `mod.f(...)`
        if let Expr::Name { id, .. } = receiver {
            if let Some(sig) = self
                .module_fns
                .get(id)
                .and_then(|table| table.get(method))
                .cloned()
            {
                if sig.params.len() != args.len() {
                    return Err(self.unsupported(&format!("arity of call to {id}.{method}"), span));
                }
                let tys: Vec<Ty> = sig.params.iter().map(|(_, t)| t.clone()).collect();
                let arg_code = self.marshal_args(&tys, args)?;
                return self.finish_direct_call(&sig.symbol, &arg_code, sig.ret);
            }
            // Foreign extension function: args are bundled and the result
            // arrives as one transferred reference.
            if let Some(func) = self
                .foreign
                .get(id)
                .and_then(|funcs| funcs.iter().find(|f| f.name == method))
                .cloned()
            {
                if func.arity != args.len() {
                    return Err(self.unsupported(&format!("arity of call to {id}.{method}"), span));
                }
                self.record_decision(format!("{id}.{method}"), Dispatch::Direct);
                let bundle = self.build_args_tuple(args)?;
                let symbol = func.symbol;
                let bc = bundle.code;
                return Ok(self.boxed_temp(Ty::Obj, &format!("{symbol}(NULL, {bc})")));
            }
        }

        let recv = self.lower_expr(receiver)?;
        match recv.ty.clone() {
            Ty::Instance(cls) => {
                let slot = self
                    .classes
                    .get(&cls)
                    .and_then(|l| l.method(method))
                    .cloned()
                    .ok_or_else(|| self.unresolved(&format!("method {cls}.{method}"), span))?;
                if slot.params.len() != args.len() {
                    return Err(self.unsupported(&format!("arity of {cls}.{method}"), span));
                }
                self.record_decision(format!("{cls}.{method}"), Dispatch::Direct);
                let mut arg_code = vec![recv.code.clone()];
                arg_code.extend(self.marshal_args(&slot.params, args)?);
                self.finish_direct_call(&format!("{cls}_{method}"), &arg_code, slot.ret)
            }
            Ty::Str | Ty::List | Ty::Dict => {
                let receiver_kind = match recv.ty {
                    Ty::Str => Receiver::Str,
                    Ty::List => Receiver::List,
                    _ => Receiver::Dict,
                };
                match registry::lookup(receiver_kind, method) {
                    Some(info) => {
                        if args.len() < info.min_args || args.len() > info.max_args {
                            return Err(
                                self.unsupported(&format!("arity of .{method}()"), span)
                            );
                        }
                        let site = match receiver_kind {
                            Receiver::Str => format!("str.{method}"),
                            Receiver::List => format!("list.{method}"),
                            Receiver::Dict => format!("dict.{method}"),
                        };
                        self.record_decision(site, Dispatch::Direct);

                        let mut arg_code = vec![recv.code.clone()];
                        for arg in args {
                            let v = self.lower_expr(arg)?;
                            let v = self.to_boxed(v)?;
                            arg_code.push(v.code);
                        }
                        while arg_code.len() < info.max_args + 1 {
                            arg_code.push("NULL".to_string());
                        }
                        let ret = self.registry_ret_ty(info);
                        self.finish_direct_call(info.symbol, &arg_code, ret)
                    }
                    None => self.lower_generic_method_call(recv, method, args),
                }
            }
            t if t.is_boxed() => self.lower_generic_method_call(recv, method, args),
            _ => {
                // Native receiver: box it and go through the generic path
                let recv = self.to_boxed(recv)?;
                self.lower_generic_method_call(recv, method, args)
            }
        }
    }

    /// Generic dynamic dispatch through the ABI's method-call entry point
    fn lower_generic_method_call(
        &mut self,
        recv: Value,
        method: &str,
        args: &[Expr],
    ) -> Result<Value> {
        self.record_decision(format!("dyn.{method}"), Dispatch::Boxed);
        let call_method = self.abi.call_method();

        let mut arg_code = Vec::new();
        for arg in args {
            let v = self.lower_expr(arg)?;
            let v = self.to_boxed(v)?;
            arg_code.push(v.code);
        }

        let recv_c = recv.code;
        let call = if arg_code.is_empty() {
            format!("{call_method}({recv_c}, \"{method}\", NULL)")
        } else {
            let mut fmt = String::from("(");
            for _ in &arg_code {
                fmt.push('O');
            }
            fmt.push(')');
            format!(
                "{call_method}({recv_c}, \"{method}\", \"{fmt}\", {})",
                arg_code.join(", ")
            )
        };
        Ok(self.boxed_temp(Ty::Obj, &call))
    }

    /// Bundle call arguments into a tuple; the bundle owns its items
    fn build_args_tuple(&mut self, args: &[Expr]) -> Result<Value> {
        let tuple_new = self.abi.tuple_new();
        let n = args.len();
        let bundle = self.boxed_temp(Ty::Tuple, &format!("{tuple_new}({n})"));
        let set = self.abi.tuple_set_item();
        for (i, arg) in args.iter().enumerate() {
            let v = self.lower_expr(arg)?;
            let v = self.to_boxed(v)?;
            // The tuple slot steals one reference
            let code = v.code.clone();
            if !(v.owned && self.untrack(&code)) {
                let incref = self.abi.incref();
                self.emitf(format_args!("{incref}({code});"));
            }
            let bc = bundle.code.clone();
            self.emitf(format_args!("{set}({bc}, {i}, {code});"));
        }
        Ok(bundle)
    }

    fn marshal_args(&mut self, params: &[Ty], args: &[Expr]) -> Result<Vec<String>> {
        let mut out = Vec::with_capacity(args.len());
        for (ty, arg) in params.iter().zip(args) {
            let v = self.lower_expr(arg)?;
            let code = match ty {
                Ty::Int | Ty::Float | Ty::Bool => self.coerce_native(v, ty)?.code,
                Ty::Instance(cls) => {
                    if v.ty != Ty::Instance(cls.clone()) {
                        return Err(self.unresolved(&format!("argument of type {cls}"), arg.span()));
                    }
                    v.code
                }
                Ty::Void => return Err(self.unresolved("void argument", arg.span())),
                _ => self.to_boxed(v)?.code,
            };
            out.push(code);
        }
        Ok(out)
    }

    // ==================== Builtins ====================

    fn lower_builtin(
        &mut self,
        name: &str,
        args: &[Expr],
        span: crate::utils::Span,
    ) -> Result<Option<Value>> {
        let result = match name {
            "print" => {
                self.lower_print(args)?;
                Value::native(self.abi.none_object(), Ty::Obj)
            }
            "len" => {
                let v = self.expect_one(args, "len", span)?;
                let v = self.lower_expr(&v)?;
                if !v.ty.is_boxed() {
                    return Err(self.unresolved("len() of a native value", span));
                }
                let length = self.abi.object_length();
                let code = v.code;
                Value::native(format!("{length}({code})"), Ty::Int)
            }
            "str" | "repr" => {
                let arg = self.expect_one(args, name, span)?;
                let v = self.lower_expr(&arg)?;
                let v = self.to_boxed(v)?;
                let symbol = if name == "repr" {
                    self.abi.repr()
                } else {
                    self.abi.str_of()
                };
                let code = v.code;
                self.boxed_temp(Ty::Str, &format!("{symbol}({code})"))
            }
            "int" => {
                let arg = self.expect_one(args, "int", span)?;
                let v = self.lower_expr(&arg)?;
                self.coerce_native(v, &Ty::Int)?
            }
            "float" => {
                let arg = self.expect_one(args, "float", span)?;
                let v = self.lower_expr(&arg)?;
                self.coerce_native(v, &Ty::Float)?
            }
            "bool" => {
                let arg = self.expect_one(args, "bool", span)?;
                let t = self.lower_truth(&arg)?;
                Value::native(format!("({t} != 0)"), Ty::Bool)
            }
            "abs" => {
                let arg = self.expect_one(args, "abs", span)?;
                let v = self.lower_expr(&arg)?;
                match v.ty {
                    Ty::Int | Ty::Bool => {
                        let v = self.materialize(v);
                        let code = v.code;
                        Value::native(format!("(({code}) < 0 ? -({code}) : ({code}))"), Ty::Int)
                    }
                    Ty::Float => {
                        let code = v.code;
                        Value::native(format!("fabs({code})"), Ty::Float)
                    }
                    _ => {
                        let v = self.to_boxed(v)?;
                        let symbol = self.abi.number_abs();
                        let code = v.code;
                        self.boxed_temp(Ty::Obj, &format!("{symbol}({code})"))
                    }
                }
            }
            "min" | "max" => match args.len() {
                1 => {
                    let v = self.lower_expr(&args[0])?;
                    if v.ty != Ty::List {
                        return Err(self.unsupported(&format!("{name}() of this value"), span));
                    }
                    let code = v.code;
                    Value::native(format!("pyrt_list_{name}({code})"), Ty::Int)
                }
                2 => {
                    let a = self.lower_expr(&args[0])?;
                    let b = self.lower_expr(&args[1])?;
                    if !a.ty.is_numeric() || !b.ty.is_numeric() {
                        return Err(self.unsupported(&format!("{name}() of boxed values"), span));
                    }
                    let ty = if a.ty == Ty::Float || b.ty == Ty::Float {
                        Ty::Float
                    } else {
                        Ty::Int
                    };
                    let a = self.materialize(a);
                    let b = self.materialize(b);
                    let c_op = if name == "min" { "<" } else { ">" };
                    let (ac, bc) = (a.code, b.code);
                    Value::native(format!("(({ac}) {c_op} ({bc}) ? ({ac}) : ({bc}))"), ty)
                }
                _ => return Err(self.unsupported(&format!("{name}() arity"), span)),
            },
            "sum" => {
                let arg = self.expect_one(args, "sum", span)?;
                let v = self.lower_expr(&arg)?;
                if v.ty != Ty::List {
                    return Err(self.unsupported("sum() of this value", span));
                }
                let code = v.code;
                Value::native(format!("pyrt_list_sum({code})"), Ty::Int)
            }
            "range" => {
                let mut codes = Vec::with_capacity(args.len());
                for arg in args {
                    let v = self.lower_expr(arg)?;
                    codes.push(self.coerce_int(v)?.code);
                }
                let (start, stop, step) = match codes.as_slice() {
                    [stop] => ("0".to_string(), stop.clone(), "1".to_string()),
                    [start, stop] => (start.clone(), stop.clone(), "1".to_string()),
                    [start, stop, step] => (start.clone(), stop.clone(), step.clone()),
                    _ => return Err(self.unsupported("range() arity", span)),
                };
                self.boxed_temp(
                    Ty::List,
                    &format!("pyrt_range_list({start}, {stop}, {step})"),
                )
            }
            "enumerate" | "zip" => {
                return Err(self.unsupported(&format!("{name}() outside a for loop"), span))
            }
            _ => return Ok(None),
        };
        Ok(Some(result))
    }

    fn expect_one(
        &self,
        args: &[Expr],
        name: &str,
        span: crate::utils::Span,
    ) -> Result<Expr> {
        if args.len() != 1 {
            return Err(self.unsupported(&format!("{name}() arity"), span));
        }
        Ok(args[0].clone())
    }

    // ==================== Attribute and subscript ====================

    fn lower_attribute(
        &mut self,
        value: &Expr,
        attr: &str,
        span: crate::utils::Span,
    ) -> Result<Value> {
        let recv = self.lower_expr(value)?;
        match recv.ty.clone() {
            Ty::Instance(cls) => {
                let field_ty = self
                    .classes
                    .get(&cls)
                    .and_then(|l| l.field(attr))
                    .cloned()
                    .ok_or_else(|| self.unresolved(&format!("field {cls}.{attr}"), span))?;
                self.record_decision(format!("{cls}.{attr}"), Dispatch::Direct);
                Ok(Value::native(format!("{}->{attr}", recv.code), field_ty))
            }
            t if t.is_boxed() => {
                self.record_decision(format!("dyn.{attr}"), Dispatch::Boxed);
                let getattr = self.abi.getattr();
                let code = recv.code;
                Ok(self.boxed_temp(Ty::Obj, &format!("{getattr}({code}, \"{attr}\")")))
            }
            _ => Err(self.unresolved(&format!("attribute {attr} on a native value"), span)),
        }
    }

    fn lower_subscript(
        &mut self,
        value: &Expr,
        index: &Expr,
        span: crate::utils::Span,
    ) -> Result<Value> {
        let recv = self.lower_expr(value)?;
        if !recv.ty.is_boxed() {
            return Err(self.unresolved("subscript of a native value", span));
        }

        if let Expr::Slice {
            lower, upper, step, ..
        } = index
        {
            let bound = |gen: &mut Self, e: &Option<Box<Expr>>| -> Result<String> {
                match e {
                    None => Ok("PYRT_SLICE_NONE".to_string()),
                    Some(e) => {
                        let v = gen.lower_expr(e)?;
                        Ok(gen.coerce_int(v)?.code)
                    }
                }
            };
            let lo = bound(self, lower)?;
            let hi = bound(self, upper)?;
            let st = bound(self, step)?;
            let recv_ty = recv.ty.clone();
            let code = recv.code;
            return Ok(self.boxed_temp(recv_ty, &format!("pyrt_slice({code}, {lo}, {hi}, {st})")));
        }

        let idx = self.lower_expr(index)?;
        match recv.ty.clone() {
            Ty::List | Ty::Tuple | Ty::Str if idx.ty.is_numeric() => {
                let i = self.coerce_int(idx)?;
                let get = self.abi.seq_get_item();
                let elem_ty = if recv.ty == Ty::Str { Ty::Str } else { Ty::Obj };
                let (rc, ic) = (recv.code, i.code);
                Ok(self.boxed_temp(elem_ty, &format!("{get}({rc}, {ic})")))
            }
            _ => {
                let key = self.to_boxed(idx)?;
                let get = self.abi.object_get_item();
                let (rc, kc) = (recv.code, key.code);
                Ok(self.boxed_temp(Ty::Obj, &format!("{get}({rc}, {kc})")))
            }
        }
    }

    // ==================== Literals ====================

    fn lower_list_literal(&mut self, elts: &[Expr]) -> Result<Value> {
        let list_new = self.abi.list_new();
        let list = self.boxed_temp(Ty::List, &format!("{list_new}(0)"));
        let append = self.abi.list_append();
        for elt in elts {
            let v = self.lower_expr(elt)?;
            let v = self.to_boxed(v)?;
            let (lc, vc) = (list.code.clone(), v.code);
            self.emitf(format_args!("{append}({lc}, {vc});"));
        }
        Ok(list)
    }

    fn lower_tuple_literal(&mut self, elts: &[Expr]) -> Result<Value> {
        let tuple_new = self.abi.tuple_new();
        let n = elts.len();
        let tuple = self.boxed_temp(Ty::Tuple, &format!("{tuple_new}({n})"));
        let set = self.abi.tuple_set_item();
        for (i, elt) in elts.iter().enumerate() {
            let v = self.lower_expr(elt)?;
            let v = self.to_boxed(v)?;
            let code = v.code.clone();
            if !(v.owned && self.untrack(&code)) {
                let incref = self.abi.incref();
                self.emitf(format_args!("{incref}({code});"));
            }
            let tc = tuple.code.clone();
            self.emitf(format_args!("{set}({tc}, {i}, {code});"));
        }
        Ok(tuple)
    }

    fn lower_set_literal(&mut self, elts: &[Expr]) -> Result<Value> {
        let set_new = self.abi.set_new();
        let set = self.boxed_temp(Ty::Set, &format!("{set_new}(NULL)"));
        let add = self.abi.set_add();
        for elt in elts {
            let v = self.lower_expr(elt)?;
            let v = self.to_boxed(v)?;
            let (sc, vc) = (set.code.clone(), v.code);
            self.emitf(format_args!("{add}({sc}, {vc});"));
        }
        Ok(set)
    }

    fn lower_dict_literal(
        &mut self,
        keys: &[Option<Expr>],
        values: &[Expr],
        span: crate::utils::Span,
    ) -> Result<Value> {
        let dict_new = self.abi.dict_new();
        let dict = self.boxed_temp(Ty::Dict, &format!("{dict_new}()"));
        let set = self.abi.dict_set_item();
        for (key, value) in keys.iter().zip(values) {
            let Some(key) = key else {
                return Err(self.unsupported("dict ** expansion", span));
            };
            let k = self.lower_expr(key)?;
            let k = self.to_boxed(k)?;
            let v = self.lower_expr(value)?;
            let v = self.to_boxed(v)?;
            let (dc, kc, vc) = (dict.code.clone(), k.code, v.code);
            self.emitf(format_args!("{set}({dc}, {kc}, {vc});"));
        }
        Ok(dict)
    }

    /// A list comprehension builds its list through the same loop lowering
    /// as a `for` statement over a synthesized append body.
    fn lower_list_comp(
        &mut self,
        elt: &Expr,
        generators: &[Comprehension],
        span: crate::utils::Span,
    ) -> Result<Value> {
        if generators.is_empty() {
            return Err(self.unsupported("comprehension without generators", span));
        }
        let list_new = self.abi.list_new();
        let list = self.boxed_temp(Ty::List, &format!("{list_new}(0)"));
        self.var_types.insert(list.code.clone(), Ty::List);

        // innermost body: `<list>.append(<elt>)`
        let mut body = vec![Stmt::Expr {
            value: Expr::Call {
                func: Box::new(Expr::Attribute {
                    value: Box::new(Expr::Name {
                        id: list.code.clone(),
                        span,
                    }),
                    attr: "append".to_string(),
                    span,
                }),
                args: vec![elt.clone()],
                keywords: Vec::new(),
                span,
            },
            span,
        }];

        for generator in generators.iter().rev() {
            for cond in generator.ifs.iter().rev() {
                body = vec![Stmt::If {
                    test: cond.clone(),
                    body,
                    orelse: Vec::new(),
                    span,
                }];
            }
            body = vec![Stmt::For {
                target: generator.target.clone(),
                iter: generator.iter.clone(),
                body,
                orelse: Vec::new(),
                span,
            }];
        }

        let for_stmt = body.remove(0);
        self.lower_body(&[for_stmt])?;
        self.var_types.remove(&list.code);
        Ok(list)
    }

    // ==================== F-strings ====================

    /// Literal parts become string constants; expression parts are
    /// converted (`!r`/`!s`/`!a`), formatted against their spec, and the
    /// pieces concatenated left to right.
    fn lower_fstring(&mut self, parts: &[FStringElem]) -> Result<Value> {
        let from_str = self.abi.from_str();
        let mut acc = self.boxed_temp(Ty::Str, &format!("{from_str}(\"\")"));

        for part in parts {
            let piece = match part {
                FStringElem::Literal(text) => {
                    let text = escape_c(text);
                    self.boxed_temp(Ty::Str, &format!("{from_str}(\"{text}\")"))
                }
                FStringElem::Expr {
                    value,
                    conversion,
                    format_spec,
                } => {
                    let v = self.lower_expr(value)?;
                    let v = self.to_boxed(v)?;
                    let converted = match conversion {
                        Some('r') => {
                            let repr = self.abi.repr();
                            let code = v.code.clone();
                            self.boxed_temp(Ty::Str, &format!("{repr}({code})"))
                        }
                        Some('a') => {
                            let ascii = self.abi.ascii_of();
                            let code = v.code.clone();
                            self.boxed_temp(Ty::Str, &format!("{ascii}({code})"))
                        }
                        Some(_) => {
                            let str_of = self.abi.str_of();
                            let code = v.code.clone();
                            self.boxed_temp(Ty::Str, &format!("{str_of}({code})"))
                        }
                        None if format_spec.is_none() => {
                            let str_of = self.abi.str_of();
                            let code = v.code.clone();
                            self.boxed_temp(Ty::Str, &format!("{str_of}({code})"))
                        }
                        None => v.clone(),
                    };
                    match format_spec {
                        Some(spec) => {
                            let spec_text = escape_c(spec);
                            let spec_obj =
                                self.boxed_temp(Ty::Str, &format!("{from_str}(\"{spec_text}\")"));
                            let format = self.abi.format();
                            let (vc, sc) = (converted.code.clone(), spec_obj.code);
                            self.boxed_temp(Ty::Str, &format!("{format}({vc}, {sc})"))
                        }
                        None => converted,
                    }
                }
            };
            let (ac, pc) = (acc.code.clone(), piece.code.clone());
            acc = self.boxed_temp(Ty::Str, &format!("pyrt_str_concat({ac}, {pc})"));
        }
        Ok(acc)
    }

    pub(crate) fn indent_in(&mut self) {
        self.adjust_indent(1);
    }

    pub(crate) fn indent_out(&mut self) {
        self.adjust_indent(-1);
    }
}

fn number_op_of(op: BinOp) -> NumberOp {
    match op {
        BinOp::Add => NumberOp::Add,
        BinOp::Sub => NumberOp::Sub,
        BinOp::Mult => NumberOp::Mult,
        BinOp::Div => NumberOp::Div,
        BinOp::FloorDiv => NumberOp::FloorDiv,
        BinOp::Mod => NumberOp::Mod,
        BinOp::Pow => NumberOp::Pow,
        BinOp::MatMult => NumberOp::MatMult,
        BinOp::LShift => NumberOp::LShift,
        BinOp::RShift => NumberOp::RShift,
        BinOp::BitOr => NumberOp::BitOr,
        BinOp::BitXor => NumberOp::BitXor,
        BinOp::BitAnd => NumberOp::BitAnd,
    }
}

fn is_simple_ident(code: &str) -> bool {
    !code.is_empty()
        && code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !code.chars().next().map_or(false, |c| c.is_ascii_digit())
}
