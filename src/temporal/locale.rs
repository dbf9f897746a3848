//! Per-language phrase tables for cross-turn date merging.
//!
//! Each table answers four questions about the new fragment of a date a user
//! typed (lowercased, single-spaced):
//!
//! - `additive`: is it relative to the previous date ("the day after")?
//! - `change_hour`: does it only give a time of day ("at 10", "in the evening")?
//! - `day_in_month`: does it only give a day number ("the 20th")?
//! - `day_in_week`: does it only give a weekday ("on thursday")?
//!
//! Supporting a new language means adding one table here.

use chrono::Weekday;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::Locale;

pub(crate) struct LocalePatterns {
    pub language: &'static str,
    pub additive: &'static Regex,
    pub change_hour: &'static Regex,
    /// Must capture the day number as `day`.
    pub day_in_month: &'static Regex,
    pub day_in_week: &'static Regex,
    /// Checked in order with `contains`.
    pub weekdays: &'static [(&'static str, Weekday)],
}

impl LocalePatterns {
    pub fn day_of_month(&self, content: &str) -> Option<u32> {
        self.day_in_month.captures(content)?.name("day")?.as_str().parse().ok()
    }

    pub fn weekday_in(&self, content: &str) -> Option<Weekday> {
        self.weekdays.iter().find(|(name, _)| content.contains(name)).map(|(_, day)| *day)
    }
}

static TABLES: Lazy<Vec<LocalePatterns>> = Lazy::new(|| vec![french(), english()]);

pub(crate) fn patterns_for(locale: &Locale) -> Option<&'static LocalePatterns> {
    let language = locale.language();
    TABLES.iter().find(|t| t.language == language)
}

fn french() -> LocalePatterns {
    LocalePatterns {
        language: "fr",
        additive: full_regex!(
            ".*prochaine?$|.*suivante?$|.*qui suit$|.*(d')? ?apr[eèé]s$|.*plus tard$|.*derni[èe]re?$",
            "|.*pass[ée]e?$|.*pr[eé]c[eé]dente?$|.*(d')? ?avant$|.*plus t[oô]t$|lendemain|le lendemain|la veille",
            "|ce jour|(le |la )?m[eê]me jour(n[eé]e)?"
        ),
        change_hour: full_regex!(
            "(dans )?(le |la |en |(en )?fin de |(en )?d[ée]but de |(en )?milieu de )?soir[ée]?e?",
            "|(dans )?(le |la |en |(en )?fin de |(en )?d[ée]but de |(en )?milieu de )?mat(in[ée]?e?)?",
            "|(dans )?(l. ?|(en )?fin d. ?|(en )?d[ée]but d. ?|(en )?milieu d. ?)?apr[eéè](s?[ \\-]?midi|m)",
            "|([aà]|vers|apr(e|è)s|[aà] partir de|avant|jusqu'[aà])? ?((([01]?\\d)|(2[0-3]))([:h]|heures?)?([0-5]\\d)?)",
            "(du|dans l[ae']? ?|au|en|l[ae'] ?|dès l?[ae']? ?|(en )?d[ée]but (de |d' ?)|(en )?fin (de |d' ?)|(en )?d[ée]but (d' ?|de ))?",
            "(mat(in[ée]?e?)|soir[ée]?e?|apr[eéè]s?[ \\-]?midi|journ[ée]e)?",
            "|entre ?((([01]?\\d)|(2[0-3]))([:h]|heures?)?([0-5]\\d)?)",
            "(du|dans l[ae']? ?|au|en|l[ae'] ?|dès l?[ae']? ?|(en )?d[ée]but (de |d' ?)|(en )?fin (de |d' ?)|(en )?d[ée]but (d' ?|de ))?",
            "(mat(in[ée]?e?)|soir[ée]?e?|apr[eéè]s?[ \\-]?midi|journ[ée]e)? et .*"
        ),
        day_in_month: full_regex!("le (?P<day>\\d?\\d)"),
        day_in_week: full_regex!("(le )?(lundi|mardi|mercredi|jeudi|vendredi|samedi|dimanche)"),
        weekdays: &[
            ("lundi", Weekday::Mon),
            ("mardi", Weekday::Tue),
            ("mercredi", Weekday::Wed),
            ("jeudi", Weekday::Thu),
            ("vendredi", Weekday::Fri),
            ("samedi", Weekday::Sat),
            ("dimanche", Weekday::Sun),
        ],
    }
}

fn english() -> LocalePatterns {
    LocalePatterns {
        language: "en",
        additive: full_regex!(
            ".*next$|.*following$|.*after$|.*later$|.*before$|.*earlier$|.*previous$",
            "|(the )?day after|(the )?next day|(the )?day before|the previous day|(the |that )?same day|that day"
        ),
        change_hour: full_regex!(
            "(in the |this |(early |late )(in the )?)?(morning|afternoon|evening)|(at |to|for )?(tonight|night)",
            "|(at|around|about|after|before|from|until|by)? ?((([01]?\\d)|(2[0-3]))((:|h)[0-5]\\d)?) ?(am|pm|h|o'?clock)?",
            "( in the (morning|afternoon|evening)| at night)?",
            "|between ?((([01]?\\d)|(2[0-3]))((:|h)[0-5]\\d)?) ?(am|pm)? and .*",
            "|noon|midday|midnight|at noon|at midnight"
        ),
        day_in_month: full_regex!("(on )?the (?P<day>\\d?\\d)(st|nd|rd|th)?"),
        day_in_week: full_regex!("(on |that )?(monday|tuesday|wednesday|thursday|friday|saturday|sunday)"),
        weekdays: &[
            ("monday", Weekday::Mon),
            ("tuesday", Weekday::Tue),
            ("wednesday", Weekday::Wed),
            ("thursday", Weekday::Thu),
            ("friday", Weekday::Fri),
            ("saturday", Weekday::Sat),
            ("sunday", Weekday::Sun),
        ],
    }
}
