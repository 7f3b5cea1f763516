//! Bot command language
//!
//! Only the first line of a comment is considered. Recognized forms:
//!
//! - `@bot r+` approve as a reviewer
//! - `@bot r=alice,bob` approve on behalf of the named reviewers
//! - `@bot r-` withdraw an approval
//! - `@alice r?` / `r? @alice @bob` ask for review

use crate::error::{Error, Result};
use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

/// Reviewer placeholder standing for the comment author in `r=`
pub const SENDER_ALIAS: &str = "me";

/// A parsed bot command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `r?`: assign the listed users as reviewers
    AssignReviewer {
        /// Users to assign
        reviewers: Vec<String>,
    },
    /// `@bot r+`: the sender approves the change
    AcceptByReviewer {
        /// Bot the command is addressed to
        bot: String,
    },
    /// `@bot r=a,b`: the sender approves on behalf of reviewers
    AcceptByOthers {
        /// Bot the command is addressed to
        bot: String,
        /// Reviewers named in the command
        reviewers: Vec<String>,
    },
    /// `@bot r-`: withdraw the approval
    Withdraw {
        /// Bot the command is addressed to
        bot: String,
    },
}

impl Command {
    /// Bot the command is addressed to, if it targets one
    pub fn bot_name(&self) -> Option<&str> {
        match self {
            Self::AssignReviewer { .. } => None,
            Self::AcceptByReviewer { bot }
            | Self::AcceptByOthers { bot, .. }
            | Self::Withdraw { bot } => Some(bot),
        }
    }
}

/// Replace [`SENDER_ALIAS`] entries with the sender's login
pub fn resolve_reviewers(reviewers: &[String], sender: &str) -> Vec<String> {
    reviewers
        .iter()
        .map(|r| {
            if r == SENDER_ALIAS {
                sender.to_string()
            } else {
                r.clone()
            }
        })
        .collect()
}

/// Parse the first line of a comment body into a [`Command`]
pub fn parse_command(text: &str) -> Result<Command> {
    let line = text.lines().next().unwrap_or_default();
    Parser::new(tokenize(line)).parse()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ws,
    Ident(String),
    /// `r`
    Review,
    /// `r-`
    Reject,
    Comma,
    Equal,
    Question,
    At,
    Plus,
    Minus,
    Illegal(char),
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ws => f.write_str("whitespace"),
            Self::Ident(s) => write!(f, "`{s}`"),
            Self::Review => f.write_str("`r`"),
            Self::Reject => f.write_str("`r-`"),
            Self::Comma => f.write_str("`,`"),
            Self::Equal => f.write_str("`=`"),
            Self::Question => f.write_str("`?`"),
            Self::At => f.write_str("`@`"),
            Self::Plus => f.write_str("`+`"),
            Self::Minus => f.write_str("`-`"),
            Self::Illegal(c) => write!(f, "`{c}`"),
            Self::Eof => f.write_str("end of line"),
        }
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-'
}

fn tokenize(line: &str) -> Vec<Token> {
    let mut chars: Peekable<Chars<'_>> = line.chars().peekable();
    let mut tokens = Vec::new();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            while chars.next_if(|c| c.is_whitespace()).is_some() {}
            tokens.push(Token::Ws);
        } else if is_ident_char(c) {
            let mut ident = String::new();
            while let Some(c) = chars.next_if(|&c| is_ident_char(c)) {
                ident.push(c);
            }
            tokens.push(match ident.as_str() {
                "r" => Token::Review,
                "r-" => Token::Reject,
                _ => Token::Ident(ident),
            });
        } else {
            chars.next();
            tokens.push(match c {
                ',' => Token::Comma,
                '=' => Token::Equal,
                '?' => Token::Question,
                '@' => Token::At,
                '+' => Token::Plus,
                '-' => Token::Minus,
                other => Token::Illegal(other),
            });
        }
    }
    tokens
}

fn unexpected(found: &Token, expected: &str) -> Error {
    Error::Parse(format!("found {found}, expected {expected}"))
}

fn single(mut users: Vec<String>) -> Result<String> {
    if users.len() != 1 {
        return Err(Error::Parse(format!(
            "found {} users, expected exactly one",
            users.len()
        )));
    }
    Ok(users.remove(0))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    const fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn next(&mut self) -> Token {
        let token = self.tokens.get(self.pos).cloned().unwrap_or(Token::Eof);
        self.pos += 1;
        token
    }

    fn next_non_ws(&mut self) -> Token {
        match self.next() {
            Token::Ws => self.next(),
            token => token,
        }
    }

    const fn back(&mut self) {
        self.pos -= 1;
    }

    fn parse(mut self) -> Result<Command> {
        match self.next_non_ws() {
            Token::At => {
                self.back();
                self.parse_addressed()
            }
            Token::Review => self.parse_review_request(),
            other => Err(unexpected(&other, "`@` or `r?`")),
        }
    }

    /// `@user...` followed by `r+`, `r=`, `r-` or `r?`
    fn parse_addressed(&mut self) -> Result<Command> {
        let mut users = Vec::new();
        loop {
            users.push(self.parse_mention()?);
            let token = self.next_non_ws();
            self.back();
            if matches!(token, Token::Review | Token::Reject) {
                break;
            }
        }

        let command = match self.next_non_ws() {
            Token::Reject => Command::Withdraw {
                bot: single(users)?,
            },
            Token::Review => match self.next() {
                Token::Question => Command::AssignReviewer { reviewers: users },
                Token::Plus => Command::AcceptByReviewer {
                    bot: single(users)?,
                },
                Token::Equal => Command::AcceptByOthers {
                    bot: single(users)?,
                    reviewers: self.parse_reviewer_list()?,
                },
                other => return Err(unexpected(&other, "`+`, `=` or `?` after `r`")),
            },
            other => return Err(unexpected(&other, "a command")),
        };

        self.expect_end()?;
        Ok(command)
    }

    /// `r? @a @b`
    fn parse_review_request(&mut self) -> Result<Command> {
        match self.next() {
            Token::Question => {}
            other => return Err(unexpected(&other, "`?`")),
        }

        let mut reviewers = Vec::new();
        while let Ok(user) = self.parse_mention() {
            reviewers.push(user);
        }
        if reviewers.is_empty() {
            return Err(Error::Parse("no reviewer given".to_string()));
        }

        self.expect_end()?;
        Ok(Command::AssignReviewer { reviewers })
    }

    /// `a, b ,c`
    fn parse_reviewer_list(&mut self) -> Result<Vec<String>> {
        let mut reviewers = Vec::new();
        loop {
            match self.next_non_ws() {
                Token::Ident(name) => reviewers.push(name),
                other => return Err(unexpected(&other, "a reviewer name")),
            }
            match self.next_non_ws() {
                Token::Comma => {}
                Token::Eof => {
                    self.back();
                    return Ok(reviewers);
                }
                other => return Err(unexpected(&other, "`,`")),
            }
        }
    }

    /// `@name`, with no space after `@`
    fn parse_mention(&mut self) -> Result<String> {
        match self.next_non_ws() {
            Token::At => {}
            other => {
                self.back();
                return Err(unexpected(&other, "`@`"));
            }
        }
        match self.next() {
            Token::Ident(name) => Ok(name),
            other => {
                self.back();
                Err(unexpected(&other, "a user name"))
            }
        }
    }

    fn expect_end(&mut self) -> Result<()> {
        match self.next_non_ws() {
            Token::Eof => Ok(()),
            other => Err(unexpected(&other, "end of line")),
        }
    }
}
