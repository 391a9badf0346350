//! Walking a member access chain (`a.b()->c[0].`) from its root type to the
//! type whose members are completed.

use crate::frontend::{Cursor, CursorKind};
use crate::parsehelp::{solve_template, Op, TailToken, TemplateSpec};

use super::Resolver;

/// Chains with more member accesses than this are left to the front end.
pub const MAX_CHAIN: usize = 10;

/// A template argument as written, with the declaration whose scope names
/// it. Arguments typed into the buffer have no scope and are looked up the
/// way the buffer sees them.
#[derive(Debug, Clone)]
pub struct TemplateArg<'tu> {
    pub spec: TemplateSpec,
    pub scope: Option<Cursor<'tu>>,
}

impl TemplateArg<'_> {
    /// The argument spelled back out: `std::vector<int>`.
    pub fn spelling(&self) -> String {
        spell(&self.spec)
    }
}

fn spell(spec: &TemplateSpec) -> String {
    match &spec.args {
        Some(args) => format!(
            "{}<{}>",
            spec.name,
            args.iter().map(spell).collect::<Vec<_>>().join(", ")
        ),
        None => spec.name.clone(),
    }
}

/// The instantiation the walk is currently inside.
#[derive(Debug, Clone)]
pub struct Template<'tu> {
    pub name: String,
    pub args: Option<Vec<TemplateArg<'tu>>>,
}

impl<'tu> Template<'tu> {
    pub fn new(spec: TemplateSpec, scope: Option<Cursor<'tu>>) -> Self {
        Self {
            name: spec.name,
            args: spec
                .args
                .map(|args| args.into_iter().map(|spec| TemplateArg { spec, scope }).collect()),
        }
    }

    pub fn parse(typename: &str, scope: Option<Cursor<'tu>>) -> Self {
        Self::new(solve_template(typename), scope)
    }

    pub fn arg(&self, index: usize) -> Option<&TemplateArg<'tu>> {
        self.args.as_ref().and_then(|args| args.get(index))
    }
}

/// Where a walk stands.
#[derive(Debug, Clone)]
pub struct Walk<'tu> {
    /// Type being walked; `None` once the chain cannot be followed.
    pub cursor: Option<Cursor<'tu>>,
    pub template: Template<'tu>,
    pub pointer: u32,
    /// The last operator, which decides how Objective-C members are listed.
    pub last_op: Option<Op>,
    /// The expression is known to have no members.
    pub empty: bool,
}

impl<'tu> Walk<'tu> {
    pub fn new(cursor: Option<Cursor<'tu>>, template: Template<'tu>, pointer: u32) -> Self {
        Self {
            cursor,
            template,
            pointer,
            last_op: None,
            empty: false,
        }
    }

    fn dead_end(&mut self) {
        self.cursor = None;
        self.empty = true;
    }

    fn give_up(&mut self) {
        self.cursor = None;
    }

    /// Whether the walk ended on something whose members can be listed.
    pub fn completable(&self) -> Option<Cursor<'tu>> {
        let cursor = self.cursor?;
        (!self.empty && (self.pointer == 0 || cursor.kind() == CursorKind::ObjCInterfaceDecl)).then_some(cursor)
    }
}

/// What a member evaluates to.
#[derive(Debug, Clone)]
pub struct Solved<'tu> {
    pub cursor: Option<Cursor<'tu>>,
    pub template: Template<'tu>,
    pub pointer: u32,
}

impl<'tu> Resolver<'tu> {
    /// Resolves the type a member of `owner` returns, substituting template
    /// parameters with the arguments of the current instantiation.
    pub fn solve_member(
        &self,
        data: &str,
        owner: Cursor<'tu>,
        member: Cursor<'tu>,
        template: Template<'tu>,
    ) -> Solved<'tu> {
        let mut cursor = member.returned_cursor();
        let pointer = member.returned_pointer_level();
        let mut template = template;

        if let Some(temp) = cursor {
            match temp.kind() {
                CursorKind::TemplateTypeParameter => {
                    let ordinal = owner
                        .template_parameters()
                        .iter()
                        .position(|p| *p == temp || p.spelling() == temp.spelling());
                    if let Some(arg) = ordinal.and_then(|i| template.arg(i)).cloned() {
                        cursor = self.resolve_arg(data, &arg);
                        template = Template::new(arg.spec, arg.scope);
                    }
                }
                CursorKind::ClassTemplate => {
                    if let Some(written) = member.type_base() {
                        template = Template::parse(written, Some(member));
                    }
                }
                _ => {}
            }
        }
        Solved {
            cursor,
            template,
            pointer,
        }
    }

    /// The type a template argument names.
    pub fn resolve_arg(&self, data: &str, arg: &TemplateArg<'tu>) -> Option<Cursor<'tu>> {
        let found = match arg.scope {
            Some(scope) => scope
                .resolve_type(&arg.spec.name)
                .or_else(|| self.find_type(data, &arg.spec.name)),
            None => self.find_type(data, &arg.spec.name),
        }?;
        found.returned_cursor().or(Some(found))
    }

    /// Looks through a typedef of a template instantiation
    /// (`typedef std::vector<int> intvector;`) to the class template and
    /// its arguments.
    pub fn expand_alias(&self, cursor: Cursor<'tu>) -> Option<(Cursor<'tu>, Template<'tu>)> {
        if !matches!(cursor.kind(), CursorKind::TypedefDecl | CursorKind::TypeAliasDecl) {
            return None;
        }
        let written = cursor.type_base()?;
        if !written.contains('<') {
            return None;
        }
        let template = Template::parse(written, Some(cursor));
        let target = cursor.resolve_type(&template.name)?;
        let target = target.returned_cursor().unwrap_or(target);
        target.kind().is_record().then_some((target, template))
    }

    /// Replaces a complex typedef under the walk with what it names.
    fn settle(&self, walk: &mut Walk<'tu>) {
        if let Some(cursor) = walk.cursor {
            if let Some((target, template)) = self.expand_alias(cursor) {
                walk.cursor = Some(target);
                walk.template = template;
            }
        }
    }

    fn apply_operator(&self, data: &str, walk: &mut Walk<'tu>, owner: Cursor<'tu>, operator: &str, deref: bool) {
        match owner.member(operator, true) {
            Some(member) => {
                let solved = self.solve_member(data, owner, member, walk.template.clone());
                walk.template = solved.template;
                walk.pointer = if deref {
                    solved.pointer.saturating_sub(1)
                } else {
                    solved.pointer
                };
                walk.cursor = solved.cursor;
                if walk.cursor.is_none() {
                    walk.empty = true;
                }
            }
            None => walk.dead_end(),
        }
    }

    /// Follows `tail` from the walk's current type. Subscripts written
    /// directly on the root are part of the root and are skipped; the
    /// root's pointer level decides what may follow.
    pub fn walk_chain(&self, data: &str, mut walk: Walk<'tu>, tail: &[TailToken]) -> Walk<'tu> {
        let tokens = tail
            .iter()
            .skip_while(|t| matches!(t, TailToken::Op(Op::Subscript)));

        // one step per operator, together with the member before it
        let mut steps = 0;
        for token in tokens {
            self.settle(&mut walk);
            let Some(owner) = walk.cursor else {
                break;
            };
            if !owner.kind().is_record() {
                if owner.kind() == CursorKind::TemplateTypeParameter {
                    walk.give_up();
                } else {
                    walk.dead_end();
                }
                break;
            }
            if matches!(token, TailToken::Op(_)) {
                steps += 1;
                if steps > MAX_CHAIN {
                    walk.give_up();
                    break;
                }
            }
            let objc = owner.kind() == CursorKind::ObjCInterfaceDecl;
            if objc {
                walk.pointer = 0;
            }

            match token {
                TailToken::Op(op) => {
                    match op {
                        Op::Dot if walk.pointer > 0 && !objc => {
                            walk.dead_end();
                            break;
                        }
                        Op::Arrow | Op::Subscript | Op::Call if objc => {}
                        Op::Arrow if walk.pointer == 0 => {
                            self.apply_operator(data, &mut walk, owner, "operator->", true)
                        }
                        Op::Subscript if walk.pointer == 0 => {
                            self.apply_operator(data, &mut walk, owner, "operator[]", false)
                        }
                        Op::Call if walk.pointer == 0 => {
                            self.apply_operator(data, &mut walk, owner, "operator()", false)
                        }
                        Op::Arrow | Op::Subscript => walk.pointer -= 1,
                        // calling through a function pointer
                        Op::Call => walk.give_up(),
                        Op::Dot | Op::Scope | Op::Message => {}
                    }
                    walk.last_op = Some(*op);
                }
                TailToken::Member { name, call } => {
                    let is_function = *call || walk.last_op == Some(Op::Message);
                    let Some(member) = owner.member(name, is_function) else {
                        walk.give_up();
                        break;
                    };
                    let solved = self.solve_member(data, owner, member, walk.template.clone());
                    walk.template = solved.template;
                    walk.pointer = solved.pointer;
                    walk.cursor = solved.cursor;
                    if walk.cursor.is_none() {
                        // the member has no type with members
                        walk.empty = true;
                    }
                }
            }
            if walk.cursor.is_none() {
                break;
            }
        }
        self.settle(&mut walk);
        walk
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn template_arguments_spell_back() {
        let template = Template::parse("std::map<int, std::vector<Foo>>", None);
        assert_eq!(template.name, "std::map");
        let args: Vec<String> = template
            .args
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|a| a.spelling())
            .collect();
        assert_eq!(args, vec!["int".to_string(), "std::vector<Foo>".to_string()]);
        assert!(template.arg(2).is_none());
    }

    #[test]
    fn plain_types_have_no_arguments() {
        let template = Template::parse("Class1", None);
        assert_eq!(template.name, "Class1");
        assert!(template.args.is_none());
    }
}
